//! Unit prices at order time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId};
use tokio::sync::RwLock;

/// Where the orchestrator looks up a product's current unit price.
#[async_trait]
pub trait PriceCatalog: Send + Sync {
    /// `None` if the catalog does not sell the product.
    async fn unit_price(&self, product_id: &ProductId) -> Option<Money>;
}

#[async_trait]
impl<T: PriceCatalog + ?Sized> PriceCatalog for Arc<T> {
    async fn unit_price(&self, product_id: &ProductId) -> Option<Money> {
        (**self).unit_price(product_id).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceCatalog {
    prices: Arc<RwLock<HashMap<ProductId, Money>>>,
}

impl InMemoryPriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prices(prices: impl IntoIterator<Item = (ProductId, Money)>) -> Self {
        Self {
            prices: Arc::new(RwLock::new(prices.into_iter().collect())),
        }
    }

    pub async fn set_price(&self, product_id: impl Into<ProductId>, price: Money) {
        self.prices.write().await.insert(product_id.into(), price);
    }
}

#[async_trait]
impl PriceCatalog for InMemoryPriceCatalog {
    async fn unit_price(&self, product_id: &ProductId) -> Option<Money> {
        self.prices.read().await.get(product_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let catalog =
            InMemoryPriceCatalog::from_prices([(ProductId::new("SKU-A"), Money::from_cents(250))]);
        catalog.set_price("SKU-B", Money::from_cents(99)).await;

        assert_eq!(
            catalog.unit_price(&ProductId::new("SKU-A")).await,
            Some(Money::from_cents(250))
        );
        assert_eq!(
            catalog.unit_price(&ProductId::new("SKU-B")).await,
            Some(Money::from_cents(99))
        );
        assert_eq!(catalog.unit_price(&ProductId::new("SKU-C")).await, None);
    }
}

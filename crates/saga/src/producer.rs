//! Checkout producer: turns a cart into a `CheckoutRequested` message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use messaging::message::validate_items;
use messaging::{
    CheckoutItem, CheckoutRequested, MessageChannel, MessageChannelExt, MessageError, queues,
};
use tokio::sync::RwLock;

use crate::error::Result;

/// Per-user shopping carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn items(&self, user_id: &UserId) -> Result<Vec<CheckoutItem>>;

    async fn clear(&self, user_id: &UserId) -> Result<()>;
}

#[async_trait]
impl<T: CartStore + ?Sized> CartStore for Arc<T> {
    async fn items(&self, user_id: &UserId) -> Result<Vec<CheckoutItem>> {
        (**self).items(user_id).await
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        (**self).clear(user_id).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<UserId, Vec<CheckoutItem>>>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_item(&self, user_id: &UserId, item: CheckoutItem) {
        self.carts
            .write()
            .await
            .entry(user_id.clone())
            .or_default()
            .push(item);
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn items(&self, user_id: &UserId) -> Result<Vec<CheckoutItem>> {
        Ok(self
            .carts
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        self.carts.write().await.remove(user_id);
        Ok(())
    }
}

/// Publishes checkout requests on behalf of the cart component.
pub struct CheckoutProducer<C, K> {
    channel: C,
    carts: K,
    clear_cart_on_checkout: bool,
}

impl<C, K> CheckoutProducer<C, K>
where
    C: MessageChannel,
    K: CartStore,
{
    pub fn new(channel: C, carts: K) -> Self {
        Self {
            channel,
            carts,
            clear_cart_on_checkout: true,
        }
    }

    pub fn with_clear_cart_on_checkout(mut self, clear: bool) -> Self {
        self.clear_cart_on_checkout = clear;
        self
    }

    /// Validates `items`, assigns an order ID and publishes the request.
    ///
    /// Returns the order ID to poll for status.
    #[tracing::instrument(skip(self, items), fields(user_id = %user_id, items = items.len()))]
    pub async fn checkout(&self, user_id: UserId, items: Vec<CheckoutItem>) -> Result<OrderId> {
        if user_id.is_empty() {
            return Err(MessageError::Invalid("user_id is empty".to_string()).into());
        }
        validate_items(&items)?;

        let order_id = OrderId::new();
        let request = CheckoutRequested::new(order_id, user_id.clone(), items);
        self.channel
            .publish_message(queues::CHECKOUT_REQUESTED, &request)
            .await?;
        tracing::info!(%order_id, "Checkout requested");

        if self.clear_cart_on_checkout {
            self.carts.clear(&user_id).await?;
        }

        Ok(order_id)
    }

    /// Checks out whatever is in the user's cart.
    pub async fn checkout_cart(&self, user_id: UserId) -> Result<OrderId> {
        let items = self.carts.items(&user_id).await?;
        self.checkout(user_id, items).await
    }
}

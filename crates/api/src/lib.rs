//! Storefront service: checkout saga workers behind a thin HTTP surface.
//!
//! The binary runs every worker of the checkout pipeline in one process, each
//! as a pool of consumers on the shared channel, and serves health, metrics,
//! checkout submission, order-status polling and stock display.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::OrderService;
use event_store::{EventStore, InMemoryEventStore};
use inventory::{InMemoryInventoryLedger, InventoryLedger};
use messaging::{Consumer, ConsumerConfig, InMemoryChannel, MessageChannel, queues};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CartStore, CheckoutProducer, InMemoryCartStore, InMemoryPaymentGateway, InMemoryPriceCatalog,
    OrderSagaOrchestrator, PaymentGateway, PaymentOutcomeHandler, PaymentProcessor,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, SeedProduct};

/// The collaborators every worker and handler is built from.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn EventStore>,
    pub ledger: Arc<dyn InventoryLedger>,
    pub channel: Arc<dyn MessageChannel>,
    pub catalog: InMemoryPriceCatalog,
    pub gateway: Arc<dyn PaymentGateway>,
    pub carts: Arc<dyn CartStore>,
}

impl Backends {
    /// Everything in process; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryEventStore::new()),
            ledger: Arc::new(InMemoryInventoryLedger::new()),
            channel: Arc::new(InMemoryChannel::new()),
            catalog: InMemoryPriceCatalog::new(),
            gateway: Arc::new(InMemoryPaymentGateway::new()),
            carts: Arc::new(InMemoryCartStore::new()),
        }
    }

    /// Registers each product in the ledger and prices it in the catalog.
    pub async fn seed(&self, products: &[SeedProduct]) -> Result<(), inventory::LedgerError> {
        for product in products {
            let record = self
                .ledger
                .register_product(&product.product_id, product.available, product.threshold)
                .await?;
            self.catalog
                .set_price(product.product_id.clone(), product.price)
                .await;
            tracing::info!(
                product_id = %record.product_id,
                available = record.available,
                price = %product.price,
                "Seeded product"
            );
        }
        Ok(())
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orders: OrderService<Arc<dyn EventStore>>,
    pub ledger: Arc<dyn InventoryLedger>,
    pub producer: CheckoutProducer<Arc<dyn MessageChannel>, Arc<dyn CartStore>>,
}

impl AppState {
    pub fn new(backends: &Backends, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            orders: OrderService::new(backends.store.clone()),
            ledger: backends.ledger.clone(),
            producer: CheckoutProducer::new(backends.channel.clone(), backends.carts.clone())
                .with_clear_cart_on_checkout(config.clear_cart_on_checkout),
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::submit))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/inventory/{product_id}", get(routes::inventory::check))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

fn consumer_config(queue: &str, config: &Config) -> ConsumerConfig {
    ConsumerConfig::new(queue)
        .with_batch_size(config.batch_size)
        .with_visibility_timeout(config.visibility_timeout)
        .with_wait_time(config.wait_time)
        .with_max_receive_count(config.max_receive_count)
}

/// Starts the worker pools. Each stops after its batch in hand once
/// `shutdown` flips to true.
pub fn spawn_workers(
    backends: &Backends,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let orchestrator = Arc::new(
        OrderSagaOrchestrator::new(
            backends.store.clone(),
            backends.ledger.clone(),
            backends.channel.clone(),
            backends.catalog.clone(),
        )
        .with_currency(config.currency.clone()),
    );
    let outcome = Arc::new(PaymentOutcomeHandler::new(
        backends.store.clone(),
        backends.ledger.clone(),
    ));
    let processor = Arc::new(PaymentProcessor::new(
        backends.channel.clone(),
        backends.gateway.clone(),
    ));

    let mut workers = Vec::new();
    for _ in 0..config.order_workers {
        workers.push(tokio::spawn(
            Consumer::new(
                backends.channel.clone(),
                orchestrator.clone(),
                consumer_config(queues::CHECKOUT_REQUESTED, config),
            )
            .run(shutdown.clone()),
        ));
        workers.push(tokio::spawn(
            Consumer::new(
                backends.channel.clone(),
                outcome.clone(),
                consumer_config(queues::PAYMENT_EVENTS, config),
            )
            .run(shutdown.clone()),
        ));
    }
    for _ in 0..config.payment_workers {
        workers.push(tokio::spawn(
            Consumer::new(
                backends.channel.clone(),
                processor.clone(),
                consumer_config(queues::PAYMENT_REQUESTED, config),
            )
            .run(shutdown.clone()),
        ));
    }

    tracing::info!(
        order_workers = config.order_workers,
        payment_workers = config.payment_workers,
        "Workers started"
    );
    workers
}

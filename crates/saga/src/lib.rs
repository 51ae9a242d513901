//! Checkout saga for the storefront.
//!
//! The saga turns a cart into a paid, stock-committed order across workers
//! that only talk through the message channel:
//! 1. [`CheckoutProducer`] publishes `CheckoutRequested`
//! 2. [`OrderSagaOrchestrator`] places the order, reserves stock item by item
//!    and publishes `PaymentRequested`
//! 3. [`PaymentProcessor`] charges through a [`PaymentGateway`] and publishes
//!    the `PaymentEvent`
//! 4. [`PaymentOutcomeHandler`] confirms or releases every hold
//!
//! If a reservation or the payment fails, held stock is released in reverse
//! order and the order is cancelled. Every handler is idempotent: progress is
//! persisted per line item, so a redelivered message only does what is left.

pub mod catalog;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod payment;
pub mod producer;
mod steps;

pub use catalog::{InMemoryPriceCatalog, PriceCatalog};
pub use error::{Result, SagaError};
pub use orchestrator::{OrderSagaOrchestrator, REASON_INSUFFICIENT_STOCK, REASON_UNKNOWN_PRODUCT};
pub use outcome::PaymentOutcomeHandler;
pub use payment::{
    Charge, ChargeOutcome, GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentProcessor,
};
pub use producer::{CartStore, CheckoutProducer, InMemoryCartStore};

//! Shared identifiers and value types used across the storefront crates.

mod types;

pub use types::{AggregateId, Money, OrderId, ProductId, UserId};

//! Append-only event journal backing the Order aggregate.
//!
//! Every append names the version the writer last saw. Two workers racing
//! on the same order cannot both commit: the loser receives
//! [`EventStoreError::ConcurrencyConflict`] and retries from fresh state.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};

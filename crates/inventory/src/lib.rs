//! Inventory ledger for the checkout saga.
//!
//! Per-product `available`/`reserved` counters mutated only through atomic
//! conditional writes, so concurrent reservations can never oversell.
//! Order lines hold stock through keyed holds that move at most once, which
//! keeps redelivered saga steps from touching the counters twice.
//!
//! Backends:
//! - [`InMemoryInventoryLedger`]: an arena of packed `AtomicU64` counters
//! - [`PostgresInventoryLedger`]: conditional `UPDATE ... WHERE` statements

mod error;
mod ledger;
mod memory;
mod postgres;

pub use common::ProductId;
pub use error::{LedgerError, Result};
pub use ledger::{Hold, HoldKey, HoldStatus, InventoryLedger, InventoryRecord, StockCheck};
pub use memory::InMemoryInventoryLedger;
pub use postgres::PostgresInventoryLedger;

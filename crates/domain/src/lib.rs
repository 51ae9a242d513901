//! Domain layer for the checkout saga.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler, which loads, decides and appends with optimistic concurrency
//! - The Order aggregate: checkout state machine plus per-item allocation markers

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    AllocationStatus, CancelOrder, CompleteReservation, ConfirmItem, ConfirmOrder, FailReservation,
    LineItem, Order, OrderError, OrderEvent, OrderLine, OrderService, OrderState, PlaceOrder,
    RecordPaymentFailure, RecordPaymentSuccess, ReleaseItem, RequestPayment, ReserveItem,
    StateTransition,
};

//! Shared identifier types for the booking workspace.

pub mod types;

pub use types::{OrderId, PartnerId, SagaId, SlotId, UserId};

use common::{OrderId, SagaId, SlotId};
use domain::{DomainError, SlotError};
use thiserror::Error;

/// Errors that can occur when interacting with the booking store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order's version did not match the stored one.
    #[error("Version conflict for order {order_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: u64,
        actual: u64,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    #[error("Slot not found: {0}")]
    SlotNotFound(SlotId),

    /// A row with the same primary key already exists.
    #[error("Duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// The conditional reservation found too few free units.
    #[error("Slot {slot_id} has {available} units left, {requested} requested")]
    CapacityExceeded {
        slot_id: SlotId,
        requested: u32,
        available: u32,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row no longer satisfies domain invariants.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] DomainError),

    /// A stored row is missing data needed to rebuild it.
    #[error("Invalid {table} row: {reason}")]
    InvalidRow {
        table: &'static str,
        reason: &'static str,
    },
}

impl From<SlotError> for StoreError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::CapacityExceeded {
                slot_id,
                requested,
                available,
            } => StoreError::CapacityExceeded {
                slot_id,
                requested,
                available,
            },
        }
    }
}

impl StoreError {
    /// Returns true for optimistic-concurrency losses.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

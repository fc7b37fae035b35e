//! Domain error types.

use thiserror::Error;

use crate::booking::BookingError;
use crate::order::{OrderError, TransitionError, UnknownVariant};
use crate::saga_record::SagaRecordError;
use crate::slot::SlotError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An order invariant was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Booking input was rejected.
    #[error("Invalid booking: {0}")]
    Booking(#[from] BookingError),

    #[error("Saga record error: {0}")]
    SagaRecord(#[from] SagaRecordError),

    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),

    /// A stored name did not match any known variant.
    #[error("Unknown value: {0}")]
    UnknownVariant(#[from] UnknownVariant),
}

impl From<TransitionError> for DomainError {
    fn from(err: TransitionError) -> Self {
        DomainError::Order(OrderError::Transition(err))
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

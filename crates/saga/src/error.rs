//! Saga error types.

use capacity::CapacityError;
use common::{OrderId, SagaId, SlotId};
use domain::{BookingError, DomainError, OrderError, SagaRecordError};
use gateway::{ClassifiedError, GatewayError, classify};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while booking or running the payment-setup saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Booking input was rejected before any side effect.
    #[error("Invalid booking: {0}")]
    Validation(#[from] BookingError),

    /// A payment gateway call failed; carries the classification.
    #[error("Payment gateway error: {0}")]
    Gateway(Box<ClassifiedError>),

    /// The requested slot does not belong to the booking.
    #[error("Slot {slot_id} does not match the booking: {reason}")]
    SlotMismatch { slot_id: SlotId, reason: &'static str },

    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reconciler resolved the record while the saga was still running.
    /// Its decision stands; the saga wrote nothing further.
    #[error("Saga {0} was resolved by reconciliation while running")]
    Superseded(SagaId),

    /// The saga failed and unwound, but its record could not be marked
    /// failed. It stays pending until the reconciler abandons it.
    #[error("Saga {saga_id} left pending: {source}")]
    Unresolved {
        saga_id: SagaId,
        source: Box<SagaError>,
    },
}

impl SagaError {
    /// The gateway classification, if a gateway call caused this error.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self.root() {
            SagaError::Gateway(classified) => Some(classified),
            _ => None,
        }
    }

    /// True when calling again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            SagaError::Gateway(classified) => classified.retryable,
            SagaError::Store(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// The failure that stopped the saga, looking through `Unresolved`.
    pub fn root(&self) -> &SagaError {
        match self {
            SagaError::Unresolved { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the saga record is left to the reconciler, which then owns
    /// releasing the booking's slot hold.
    pub fn defers_to_reconciler(&self) -> bool {
        matches!(self, SagaError::Superseded(_) | SagaError::Unresolved { .. })
    }
}

impl From<GatewayError> for SagaError {
    fn from(err: GatewayError) -> Self {
        SagaError::Gateway(Box::new(classify(&err)))
    }
}

impl From<OrderError> for SagaError {
    fn from(err: OrderError) -> Self {
        SagaError::Domain(err.into())
    }
}

impl From<SagaRecordError> for SagaError {
    fn from(err: SagaRecordError) -> Self {
        SagaError::Domain(err.into())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

use common::SlotId;
use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("invalid slot template: {reason}")]
    InvalidTemplate { reason: String },

    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    #[error("slot {slot_id} is full: {requested} requested, {available} available")]
    SlotFull {
        slot_id: SlotId,
        requested: u32,
        available: u32,
    },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CapacityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotNotFound(id) => CapacityError::SlotNotFound(id),
            StoreError::CapacityExceeded {
                slot_id,
                requested,
                available,
            } => CapacityError::SlotFull {
                slot_id,
                requested,
                available,
            },
            other => CapacityError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CapacityError>;

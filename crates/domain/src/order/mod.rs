//! Order entity, statuses and the transition table.

mod entity;
mod status;
pub mod transitions;
mod value_objects;

pub use entity::{Order, OrderParts};
pub use status::{OrderStatus, ServiceType, UnknownVariant};
pub use transitions::{TransitionError, TransitionRule};
pub use value_objects::{Address, CustomerIdentity, GuestContact, PaymentRefs, TimeWindow};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::money::Money;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The transition table refused a status change.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The order is terminal and can no longer be changed.
    #[error("order is in terminal status {status} and cannot be modified")]
    TerminalStatus { status: OrderStatus },

    /// Total would fall below the subtotal.
    #[error("total {total} is below subtotal {subtotal}")]
    TotalBelowSubtotal { total: Money, subtotal: Money },

    /// A time window ends at or before its start.
    #[error("invalid time window: {start} to {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

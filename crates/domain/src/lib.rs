//! Domain layer for the booking core.
//!
//! This crate holds the plain data and pure rules the rest of the workspace
//! builds on:
//! - `Order` with its status graph per service type
//! - `BookingParams` and their validation
//! - `SagaRecord`, the durable progress log of a saga run
//! - `CapacitySlot` inventory
//! - rollout bucketing for gradually enabled behavior

pub mod booking;
pub mod error;
pub mod money;
pub mod order;
pub mod rollout;
pub mod saga_record;
pub mod slot;

pub use booking::{BookingError, BookingParams};
pub use error::{DomainError, Result};
pub use money::Money;
pub use order::{
    Address, CustomerIdentity, GuestContact, Order, OrderError, OrderParts, OrderStatus,
    PaymentRefs, ServiceType, TimeWindow, TransitionError, TransitionRule, UnknownVariant,
};
pub use rollout::{RolloutPolicy, bucket};
pub use saga_record::{
    PAYMENT_SETUP, RecordedStep, SagaRecord, SagaRecordError, SagaStatus, SagaStepKind,
};
pub use slot::{CapacitySlot, SlotError};

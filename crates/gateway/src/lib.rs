//! Payment gateway port for the booking core.
//!
//! The booking saga talks to the gateway only through [`PaymentGateway`].
//! [`GuardedGateway`] adds the shared quota and circuit breakers, and
//! [`classify`] turns raw failures into user-facing categories.

pub mod classifier;
pub mod client;
pub mod error;
pub mod guarded;
pub mod memory;
pub mod types;

pub use classifier::{ClassifiedError, ErrorCategory, backoff_delay, classify, should_retry};
pub use client::PaymentGateway;
pub use error::{GatewayError, GatewayErrorKind, Result};
pub use guarded::GuardedGateway;
pub use memory::{GatewayOperation, InMemoryPaymentGateway};
pub use types::{
    Charge, ChargeStatus, CreateCharge, CreateCustomer, CreateSetupIntent, Customer,
    PaymentMethod, Refund, SetupIntent, SetupIntentStatus,
};

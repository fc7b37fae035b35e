//! Payment-setup saga for new bookings.
//!
//! [`PaymentSetupSaga`] runs the booking's payment steps:
//! 1. Initialize the saga record
//! 2. Create the draft order
//! 3. Save the payment method on the gateway customer
//! 4. Validate the card with a refunded charge (authenticated customers)
//! 5. Finalize the order to `ready`
//!
//! If any step fails, completed steps are compensated in reverse order and
//! the record is marked failed. [`BookingService`] wraps the saga with slot
//! capacity, and [`SagaReconciler`] resolves records a crash left pending.

pub mod booking;
pub mod compensation;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod services;

pub use booking::{BookingService, StatusChange};
pub use compensation::{CompensationStack, UnwindReport};
pub use error::{Result, SagaError};
pub use orchestrator::{ExecuteOptions, PaymentSetupSaga, SagaConfig, SagaOutcome};
pub use reconciler::{ABANDONED, ReconcileReport, SagaReconciler};
pub use services::{InMemoryNotifier, LogNotifier, NotificationError, Notifier};

//! Persistence for the booking core.
//!
//! [`BookingStore`] is implemented twice: [`InMemoryBookingStore`] for tests
//! and single-process runs, and [`PostgresBookingStore`] backed by `sqlx`.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryBookingStore;
pub use postgres::PostgresBookingStore;
pub use store::{BookingStore, BookingStoreExt, PaymentCustomer, SlotQuery};

//! Finite appointment capacity for the booking core.
//!
//! Slots are generated ahead of demand from a [`SlotTemplate`] and drawn
//! down through the [`SlotLedger`] before a booking runs.

pub mod error;
pub mod ledger;
pub mod template;

pub use error::{CapacityError, Result};
pub use ledger::{GenerationReport, SlotHold, SlotLedger, UNITS_PER_BOOKING};
pub use template::SlotTemplate;

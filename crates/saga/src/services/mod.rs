//! Collaborators the booking flow calls after the saga.

pub mod notification;

pub use notification::{InMemoryNotifier, LogNotifier, NotificationError, Notifier};

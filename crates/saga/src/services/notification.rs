//! Notification channel trait and implementations.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification failed: {0}")]
pub struct NotificationError(pub String);

/// Tells the customer about a committed booking.
///
/// Called only after the saga commits. Failures are logged by the caller
/// and never undo the booking.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmed(&self, order: &Order) -> Result<(), NotificationError>;
}

/// Writes confirmations to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn booking_confirmed(&self, order: &Order) -> Result<(), NotificationError> {
        tracing::info!(
            order_id = %order.id(),
            service_type = order.service_type().as_str(),
            pickup_start = %order.pickup_window().start,
            has_phone = order.phone().is_some(),
            "booking confirmed"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<OrderId>,
    fail: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryNotifierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every send fail.
    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    /// Orders a confirmation was sent for, in send order.
    pub fn sent(&self) -> Vec<OrderId> {
        self.lock().sent.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn booking_confirmed(&self, order: &Order) -> Result<(), NotificationError> {
        let mut state = self.lock();
        if state.fail {
            return Err(NotificationError("sms gateway unavailable".to_string()));
        }
        state.sent.push(order.id());
        Ok(())
    }
}

//! Booking entry point: capacity first, then the payment-setup saga.

use std::sync::Arc;

use capacity::{CapacityError, SlotLedger};
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId, SlotId};
use domain::{BookingParams, CapacitySlot, Money, Order, OrderStatus, SagaRecord, TimeWindow};
use resilience::TraceContext;
use serde::Deserialize;
use store::{BookingStore, StoreError};

use crate::error::{Result, SagaError};
use crate::orchestrator::{ExecuteOptions, PaymentSetupSaga, SagaOutcome};
use crate::services::Notifier;

/// Books an order end to end.
///
/// Holds the pickup (and delivery) capacity before the saga runs and gives
/// it back if the saga fails, unless the saga record was left to the
/// reconciler, which then releases it. The notifier runs only after a commit.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    ledger: SlotLedger,
    saga: PaymentSetupSaga,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        ledger: SlotLedger,
        saga: PaymentSetupSaga,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            saga,
            notifier,
        }
    }

    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    pub fn saga(&self) -> &PaymentSetupSaga {
        &self.saga
    }

    #[tracing::instrument(
        skip_all,
        fields(trace_id = %trace.trace_id, pickup_slot_id = %params.pickup_slot_id)
    )]
    pub async fn book(
        &self,
        params: BookingParams,
        options: ExecuteOptions,
        trace: &TraceContext,
    ) -> Result<SagaOutcome> {
        params.validate()?;
        self.check_slots(&params).await?;

        let hold = self
            .ledger
            .hold(params.pickup_slot_id, params.delivery_slot_id)
            .await?;

        match self.saga.execute_traced(params, options, trace).await {
            Ok(outcome) => {
                if let Err(err) = self.notifier.booking_confirmed(&outcome.order).await {
                    metrics::counter!("booking_notifications_failed_total").increment(1);
                    tracing::warn!(
                        order_id = %outcome.order.id(),
                        error = %err,
                        "confirmation not sent"
                    );
                }
                Ok(outcome)
            }
            Err(err) if err.defers_to_reconciler() => {
                tracing::warn!(error = %err, "slot hold left to the reconciler");
                Err(err)
            }
            Err(err) => {
                self.ledger.release_hold(&hold).await;
                Err(err)
            }
        }
    }

    /// The slots must exist and describe the same partner, service and
    /// window as the booking.
    async fn check_slots(&self, params: &BookingParams) -> Result<()> {
        let pickup = self.load_slot(params.pickup_slot_id).await?;
        Self::check_slot(&pickup, params, &params.pickup_window)?;

        if let Some(delivery_id) = params.delivery_slot_id {
            let delivery = self.load_slot(delivery_id).await?;
            let window = params.delivery_window.ok_or(SagaError::SlotMismatch {
                slot_id: delivery_id,
                reason: "delivery slot given without a delivery window",
            })?;
            Self::check_slot(&delivery, params, &window)?;
        }
        Ok(())
    }

    async fn load_slot(&self, id: SlotId) -> Result<CapacitySlot> {
        match self.ledger.slot(id).await {
            Ok(slot) => Ok(slot),
            Err(CapacityError::SlotNotFound(_)) => Err(SagaError::SlotMismatch {
                slot_id: id,
                reason: "slot does not exist",
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn check_slot(slot: &CapacitySlot, params: &BookingParams, window: &TimeWindow) -> Result<()> {
        let reason = if slot.partner_id != params.partner_id {
            Some("slot belongs to another partner")
        } else if slot.service_type != params.service_type {
            Some("slot is for another service type")
        } else if slot.window != *window {
            Some("slot window differs from the requested window")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SagaError::SlotMismatch {
                slot_id: slot.id,
                reason,
            }),
            None => Ok(()),
        }
    }

    pub async fn order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or(SagaError::OrderNotFound(id))
    }

    pub async fn saga_record(&self, id: SagaId) -> Result<SagaRecord> {
        self.store
            .get_saga(id)
            .await?
            .ok_or(SagaError::SagaNotFound(id))
    }

    /// Applies a status change through the transition table.
    ///
    /// The final total and payment time are written first so guards see
    /// them. Optimistic: a concurrent writer makes this fail with a version
    /// conflict rather than being overwritten.
    #[tracing::instrument(skip(self, change), fields(to = %change.to))]
    pub async fn change_status(&self, id: OrderId, change: StatusChange) -> Result<Order> {
        let mut order = self.order(id).await?;
        let from = order.status();
        let now = Utc::now();

        if let Some(total) = change.total {
            order.set_total(total, now)?;
        }
        if let Some(paid_at) = change.paid_at {
            order.mark_paid(paid_at)?;
        }
        order.transition_to(change.to, now)?;

        let stored = match self.store.update_order(&order).await {
            Ok(stored) => stored,
            Err(StoreError::OrderNotFound(_)) => return Err(SagaError::OrderNotFound(id)),
            Err(err) => return Err(err.into()),
        };
        tracing::info!(order_id = %id, %from, to = %stored.status(), "order status changed");
        Ok(stored)
    }
}

/// A requested status change with the facts its guard may need.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusChange {
    pub to: OrderStatus,
    /// Final total, set before moving to `quote_sent`.
    #[serde(default, rename = "total_cents")]
    pub total: Option<Money>,
    /// When payment was captured.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn new(to: OrderStatus) -> Self {
        Self {
            to,
            total: None,
            paid_at: None,
        }
    }
}

impl std::fmt::Debug for BookingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingService")
            .field("saga", &self.saga)
            .finish_non_exhaustive()
    }
}

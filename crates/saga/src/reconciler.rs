//! Sweeps saga records left pending by a crash between steps.

use std::sync::Arc;

use capacity::{SlotHold, SlotLedger, UNITS_PER_BOOKING};
use chrono::{DateTime, Duration, Utc};
use domain::{BookingParams, OrderStatus, SagaRecord};
use serde::Serialize;
use store::BookingStore;

use crate::error::Result;

/// Error message written on records the sweep gives up on.
pub const ABANDONED: &str = "abandoned: saga did not finish before the reconciliation deadline";

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    /// Records whose order had already committed, now marked completed.
    pub rolled_forward: usize,
    /// Records marked failed, with their draft order deleted.
    pub abandoned: usize,
    /// Records a running saga wrote between listing and resolving.
    pub skipped: usize,
    /// Records left for the next sweep after an error.
    pub errors: usize,
}

enum Resolution {
    RolledForward,
    Abandoned,
    Skipped,
}

/// Resolves stale pending saga records.
///
/// A record whose order already left `draft` is rolled forward to
/// completed. Anything else is force-compensated: the record is marked
/// failed, then the order, if any, is deleted. With a ledger attached, the
/// capacity held for an abandoned booking is returned too.
///
/// The record is claimed with a conditional write before anything else is
/// touched, so a saga that is slow rather than dead either keeps its record
/// or learns it lost it. Whoever finalizes the record owns the slot hold.
#[derive(Clone)]
pub struct SagaReconciler {
    store: Arc<dyn BookingStore>,
    stale_after: Duration,
    ledger: Option<SlotLedger>,
}

impl SagaReconciler {
    pub fn new(store: Arc<dyn BookingStore>, stale_after: Duration) -> Self {
        Self {
            store,
            stale_after,
            ledger: None,
        }
    }

    /// Releases held slot units for abandoned bookings. Only attach a ledger
    /// when every saga runs behind a slot hold.
    pub fn with_ledger(mut self, ledger: SlotLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let stale = self.store.list_stale_sagas(now - self.stale_after).await?;
        let mut report = ReconcileReport {
            examined: stale.len(),
            ..Default::default()
        };

        for record in stale {
            let saga_id = record.id;
            match self.resolve(record, now).await {
                Ok(Resolution::RolledForward) => report.rolled_forward += 1,
                Ok(Resolution::Abandoned) => report.abandoned += 1,
                Ok(Resolution::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(%saga_id, error = %err, "failed to reconcile saga");
                }
            }
        }

        metrics::counter!("saga_reconciled_total", "outcome" => "rolled_forward")
            .increment(report.rolled_forward as u64);
        metrics::counter!("saga_reconciled_total", "outcome" => "abandoned")
            .increment(report.abandoned as u64);
        metrics::counter!("saga_reconciled_total", "outcome" => "skipped")
            .increment(report.skipped as u64);
        if report.examined > 0 {
            tracing::info!(?report, "reconciliation sweep finished");
        }
        Ok(report)
    }

    async fn resolve(&self, record: SagaRecord, now: DateTime<Utc>) -> Result<Resolution> {
        let seen = record.updated_at;
        let order = match record.order_id {
            Some(order_id) => self.store.get_order(order_id).await?,
            None => None,
        };

        if let Some(order) = &order
            && order.status() != OrderStatus::Draft
        {
            let mut completed = record.clone();
            completed.complete(now)?;
            if !self.store.update_pending_saga(&completed, seen).await? {
                tracing::info!(saga_id = %record.id, "saga moved on since listed, skipping");
                return Ok(Resolution::Skipped);
            }
            tracing::info!(
                saga_id = %record.id,
                order_id = %order.id(),
                "stale saga rolled forward"
            );
            return Ok(Resolution::RolledForward);
        }

        let mut abandoned = record.clone();
        abandoned.fail(ABANDONED, now)?;
        if !self.store.update_pending_saga(&abandoned, seen).await? {
            tracing::info!(saga_id = %record.id, "saga moved on since listed, skipping");
            return Ok(Resolution::Skipped);
        }

        // The record is ours now; a late saga step finds it final and stops.
        self.release_capacity(&abandoned).await;
        if let Some(order_id) = abandoned.order_id {
            self.store.delete_order(order_id).await?;
        }

        tracing::warn!(saga_id = %record.id, order_id = ?record.order_id, "stale saga abandoned");
        Ok(Resolution::Abandoned)
    }

    async fn release_capacity(&self, record: &SagaRecord) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        match serde_json::from_value::<BookingParams>(record.input.clone()) {
            Ok(params) => {
                ledger
                    .release_hold(&SlotHold {
                        pickup: params.pickup_slot_id,
                        delivery: params.delivery_slot_id,
                        units: UNITS_PER_BOOKING,
                    })
                    .await;
            }
            Err(err) => {
                tracing::error!(
                    saga_id = %record.id,
                    error = %err,
                    "saga input unreadable, capacity not released"
                );
            }
        }
    }
}

impl std::fmt::Debug for SagaReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaReconciler")
            .field("stale_after", &self.stale_after)
            .field("releases_capacity", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

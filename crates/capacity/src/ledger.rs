//! Slot inventory: generation, reservation and release.

use std::sync::Arc;

use common::SlotId;
use domain::CapacitySlot;
use serde::Serialize;
use store::{BookingStore, SlotQuery};

use crate::error::{CapacityError, Result};
use crate::template::SlotTemplate;

/// Units a single booking takes from a slot.
pub const UNITS_PER_BOOKING: u32 = 1;

/// Outcome of generating slots from a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// Slots the template describes.
    pub requested: u64,
    /// Slots that did not exist yet.
    pub inserted: u64,
}

/// Units held for one booking, released together if the booking fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHold {
    pub pickup: SlotId,
    pub delivery: Option<SlotId>,
    pub units: u32,
}

/// Reserves and releases appointment capacity.
///
/// Every change is a single conditional update in the store, so concurrent
/// callers can never push a slot past its maximum.
#[derive(Clone)]
pub struct SlotLedger {
    store: Arc<dyn BookingStore>,
}

impl SlotLedger {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Creates the template's slots. Slots that already exist are left as
    /// they are, so repeated or concurrent calls converge on one set.
    #[tracing::instrument(
        skip(self, template),
        fields(partner_id = %template.partner_id, day = %template.day)
    )]
    pub async fn generate(&self, template: &SlotTemplate) -> Result<GenerationReport> {
        let slots = template.slots()?;
        let inserted = self.store.insert_slots(&slots).await?;

        metrics::counter!("slots_generated_total").increment(inserted);
        tracing::info!(requested = slots.len(), inserted, "slots generated");

        Ok(GenerationReport {
            requested: slots.len() as u64,
            inserted,
        })
    }

    pub async fn slot(&self, id: SlotId) -> Result<CapacitySlot> {
        self.store
            .get_slot(id)
            .await?
            .ok_or(CapacityError::SlotNotFound(id))
    }

    pub async fn availability(&self, query: SlotQuery) -> Result<Vec<CapacitySlot>> {
        Ok(self.store.list_slots(query).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, id: SlotId, units: u32) -> Result<CapacitySlot> {
        match self.store.reserve_slot(id, units).await {
            Ok(slot) => {
                metrics::counter!("slot_reservations_total").increment(1);
                Ok(slot)
            }
            Err(err) => {
                let err = CapacityError::from(err);
                if matches!(err, CapacityError::SlotFull { .. }) {
                    metrics::counter!("slot_reservations_rejected_total").increment(1);
                    tracing::info!(slot_id = %id, units, "slot full");
                }
                Err(err)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: SlotId, units: u32) -> Result<CapacitySlot> {
        let slot = self.store.release_slot(id, units).await?;
        metrics::counter!("slot_releases_total").increment(1);
        Ok(slot)
    }

    /// Reserves the pickup slot and, if given, the delivery slot.
    ///
    /// If the delivery reservation fails the pickup units are returned
    /// before the error is reported.
    pub async fn hold(&self, pickup: SlotId, delivery: Option<SlotId>) -> Result<SlotHold> {
        self.reserve(pickup, UNITS_PER_BOOKING).await?;

        if let Some(delivery) = delivery
            && let Err(err) = self.reserve(delivery, UNITS_PER_BOOKING).await
        {
            if let Err(release_err) = self.release(pickup, UNITS_PER_BOOKING).await {
                tracing::error!(
                    slot_id = %pickup,
                    error = %release_err,
                    "failed to return pickup units"
                );
            }
            return Err(err);
        }

        Ok(SlotHold {
            pickup,
            delivery,
            units: UNITS_PER_BOOKING,
        })
    }

    /// Returns a hold's units. Failures are logged, never returned.
    pub async fn release_hold(&self, hold: &SlotHold) {
        for id in std::iter::once(hold.pickup).chain(hold.delivery) {
            if let Err(err) = self.release(id, hold.units).await {
                tracing::error!(slot_id = %id, error = %err, "failed to release held units");
            }
        }
    }
}

impl std::fmt::Debug for SlotLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLedger").finish_non_exhaustive()
    }
}

//! Finite appointment capacity.

use common::{PartnerId, SlotId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{ServiceType, TimeWindow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot {slot_id} has {available} units left, {requested} requested")]
    CapacityExceeded {
        slot_id: SlotId,
        requested: u32,
        available: u32,
    },
}

/// A bookable window for one partner and service type.
///
/// Always holds `reserved_units <= max_units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySlot {
    pub id: SlotId,
    pub partner_id: PartnerId,
    pub service_type: ServiceType,
    pub window: TimeWindow,
    pub max_units: u32,
    pub reserved_units: u32,
}

impl CapacitySlot {
    /// Creates an empty slot whose id is derived from its natural key.
    pub fn new(
        partner_id: PartnerId,
        service_type: ServiceType,
        window: TimeWindow,
        max_units: u32,
    ) -> Self {
        Self {
            id: SlotId::derive(&Self::natural_key(partner_id, service_type, &window)),
            partner_id,
            service_type,
            window,
            max_units,
            reserved_units: 0,
        }
    }

    /// `partner|SERVICE|start` in RFC 3339.
    pub fn natural_key(
        partner_id: PartnerId,
        service_type: ServiceType,
        window: &TimeWindow,
    ) -> String {
        format!(
            "{partner_id}|{service_type}|{}",
            window.start.to_rfc3339()
        )
    }

    pub fn available_units(&self) -> u32 {
        self.max_units.saturating_sub(self.reserved_units)
    }

    pub fn can_reserve(&self, units: u32) -> bool {
        units <= self.available_units()
    }

    /// Takes `units` from the slot, or leaves it untouched.
    pub fn reserve(&mut self, units: u32) -> Result<(), SlotError> {
        if !self.can_reserve(units) {
            return Err(SlotError::CapacityExceeded {
                slot_id: self.id,
                requested: units,
                available: self.available_units(),
            });
        }
        self.reserved_units += units;
        Ok(())
    }

    /// Returns units to the slot. Never goes below zero.
    pub fn release(&mut self, units: u32) {
        self.reserved_units = self.reserved_units.saturating_sub(units);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn window() -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2026, 10, 20, 9, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::hours(2)).unwrap()
    }

    #[test]
    fn test_slot_id_is_deterministic() {
        let partner = PartnerId::new();
        let a = CapacitySlot::new(partner, ServiceType::Laundry, window(), 4);
        let b = CapacitySlot::new(partner, ServiceType::Laundry, window(), 8);
        let c = CapacitySlot::new(partner, ServiceType::Cleaning, window(), 4);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_reserve_respects_capacity() {
        let mut slot = CapacitySlot::new(PartnerId::new(), ServiceType::Laundry, window(), 2);
        slot.reserve(1).unwrap();
        slot.reserve(1).unwrap();
        assert_eq!(slot.available_units(), 0);

        let err = slot.reserve(1).unwrap_err();
        assert_eq!(
            err,
            SlotError::CapacityExceeded {
                slot_id: slot.id,
                requested: 1,
                available: 0
            }
        );
        assert_eq!(slot.reserved_units, 2);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let mut slot = CapacitySlot::new(PartnerId::new(), ServiceType::Cleaning, window(), 3);
        slot.reserve(1).unwrap();
        slot.release(5);
        assert_eq!(slot.reserved_units, 0);
        assert_eq!(slot.available_units(), 3);
    }
}

//! Describes a day of slots for one partner and service type.

use chrono::{Duration, NaiveDate};
use common::PartnerId;
use domain::{CapacitySlot, ServiceType, TimeWindow};
use serde::{Deserialize, Serialize};

use crate::error::{CapacityError, Result};

/// A partner's opening hours for one day, cut into equal slots.
///
/// Hours are UTC. `close_hour` is exclusive: a template open 8 to 12 with
/// 120-minute slots yields 08:00-10:00 and 10:00-12:00.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTemplate {
    pub partner_id: PartnerId,
    pub service_type: ServiceType,
    pub day: NaiveDate,
    pub open_hour: u32,
    pub close_hour: u32,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
    pub units_per_slot: u32,
}

fn default_slot_minutes() -> u32 {
    120
}

impl SlotTemplate {
    fn invalid(reason: impl Into<String>) -> CapacityError {
        CapacityError::InvalidTemplate {
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.close_hour > 24 || self.open_hour >= self.close_hour {
            return Err(Self::invalid(format!(
                "opening hours {}-{} are not a valid range",
                self.open_hour, self.close_hour
            )));
        }
        if self.slot_minutes == 0 {
            return Err(Self::invalid("slot length must be positive"));
        }
        if self.slot_minutes > (self.close_hour - self.open_hour) * 60 {
            return Err(Self::invalid("slot length exceeds opening hours"));
        }
        if self.units_per_slot == 0 {
            return Err(Self::invalid("slots need at least one unit"));
        }
        Ok(())
    }

    /// Expands the template into empty slots, earliest first.
    ///
    /// A trailing remainder shorter than `slot_minutes` is dropped.
    pub fn slots(&self) -> Result<Vec<CapacitySlot>> {
        self.validate()?;

        let open = self
            .day
            .and_hms_opt(self.open_hour, 0, 0)
            .ok_or_else(|| Self::invalid("opening hour out of range"))?
            .and_utc();
        let close = open + Duration::hours(i64::from(self.close_hour - self.open_hour));
        let step = Duration::minutes(i64::from(self.slot_minutes));

        let mut slots = Vec::new();
        let mut start = open;
        while start + step <= close {
            let window = TimeWindow::new(start, start + step)
                .map_err(|err| Self::invalid(err.to_string()))?;
            slots.push(CapacitySlot::new(
                self.partner_id,
                self.service_type,
                window,
                self.units_per_slot,
            ));
            start += step;
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    fn template() -> SlotTemplate {
        SlotTemplate {
            partner_id: PartnerId::new(),
            service_type: ServiceType::Laundry,
            day: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            open_hour: 8,
            close_hour: 18,
            slot_minutes: 120,
            units_per_slot: 4,
        }
    }

    #[test]
    fn test_expands_day_into_slots() {
        let slots = template().slots().unwrap();
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0].window.start.hour(), 8);
        assert_eq!(slots[4].window.end.hour(), 18);
        assert!(slots.iter().all(|s| s.max_units == 4 && s.reserved_units == 0));
    }

    #[test]
    fn test_drops_short_remainder() {
        let t = SlotTemplate {
            close_hour: 13,
            ..template()
        };
        let slots = t.slots().unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].window.end.hour(), 12);
    }

    #[test]
    fn test_same_template_same_ids() {
        let t = template();
        let a: Vec<_> = t.slots().unwrap().into_iter().map(|s| s.id).collect();
        let b: Vec<_> = t.slots().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_templates() {
        for bad in [
            SlotTemplate {
                open_hour: 18,
                close_hour: 8,
                ..template()
            },
            SlotTemplate {
                close_hour: 25,
                ..template()
            },
            SlotTemplate {
                slot_minutes: 0,
                ..template()
            },
            SlotTemplate {
                units_per_slot: 0,
                ..template()
            },
            SlotTemplate {
                open_hour: 8,
                close_hour: 9,
                slot_minutes: 90,
                ..template()
            },
        ] {
            assert!(matches!(
                bad.slots(),
                Err(CapacityError::InvalidTemplate { .. })
            ));
        }
    }

    #[test]
    fn test_deserializes_with_default_length() {
        let json = serde_json::json!({
            "partner_id": PartnerId::new(),
            "service_type": "CLEANING",
            "day": "2026-10-21",
            "open_hour": 9,
            "close_hour": 17,
            "units_per_slot": 2
        });
        let t: SlotTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(t.slot_minutes, 120);
        assert_eq!(t.slots().unwrap().len(), 4);
    }
}

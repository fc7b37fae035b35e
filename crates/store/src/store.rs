use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{OrderId, PartnerId, SagaId, SlotId};
use domain::{CapacitySlot, Order, SagaRecord, ServiceType};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Mapping from a customer identity to its gateway customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCustomer {
    /// `user:<uuid>` or `guest:<lowercased email>`.
    pub identity_key: String,
    pub customer_id: String,
    pub is_guest: bool,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing capacity slots.
///
/// All filters are optional; an empty query lists every slot ordered by
/// window start.
#[derive(Debug, Clone, Default)]
pub struct SlotQuery {
    pub service_type: Option<ServiceType>,
    pub partner_id: Option<PartnerId>,
    /// Slots starting at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Slots starting before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Only slots with at least one free unit.
    pub only_available: bool,
}

impl SlotQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots of one service type whose window starts on `day` (UTC).
    pub fn for_day(service_type: ServiceType, day: NaiveDate) -> Self {
        let from = day.and_hms_opt(0, 0, 0).map(|start| start.and_utc());
        let to = day
            .succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .map(|end| end.and_utc());
        Self {
            service_type: Some(service_type),
            from,
            to,
            ..Default::default()
        }
    }

    pub fn service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn partner(mut self, partner_id: PartnerId) -> Self {
        self.partner_id = Some(partner_id);
        self
    }

    pub fn only_available(mut self) -> Self {
        self.only_available = true;
        self
    }

    /// Returns true if `slot` passes every filter.
    pub fn matches(&self, slot: &CapacitySlot) -> bool {
        self.service_type.is_none_or(|st| st == slot.service_type)
            && self.partner_id.is_none_or(|p| p == slot.partner_id)
            && self.from.is_none_or(|from| slot.window.start >= from)
            && self.to.is_none_or(|to| slot.window.start < to)
            && (!self.only_available || slot.available_units() > 0)
    }
}

/// Persistence for everything the booking core writes.
///
/// Each method is a single statement against one entity; there are no
/// cross-entity transactions. All implementations must be thread-safe.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Inserts a new order. Fails with `Duplicate` if the id exists.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Writes `order` if the stored version equals `order.version()`.
    ///
    /// Returns the order as stored, with its version advanced by one.
    async fn update_order(&self, order: &Order) -> Result<Order>;

    /// Hard-deletes an order. Returns false if it was already gone.
    async fn delete_order(&self, id: OrderId) -> Result<bool>;

    async fn insert_saga(&self, record: &SagaRecord) -> Result<()>;

    /// Overwrites a saga record that is still pending and was last written
    /// at `seen_updated_at`.
    ///
    /// Returns false, writing nothing, when another writer finalized or
    /// touched the record since. Fails with `SagaNotFound` if it is missing.
    async fn update_pending_saga(
        &self,
        record: &SagaRecord,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get_saga(&self, id: SagaId) -> Result<Option<SagaRecord>>;

    /// Pending records whose last update is at or before `updated_before`,
    /// oldest first.
    async fn list_stale_sagas(&self, updated_before: DateTime<Utc>) -> Result<Vec<SagaRecord>>;

    async fn find_payment_customer(&self, identity_key: &str) -> Result<Option<PaymentCustomer>>;

    /// Inserts a mapping unless one exists for the identity key.
    ///
    /// Returns whichever mapping is stored afterwards, so a caller that lost
    /// a race reads back the winner.
    async fn insert_payment_customer(&self, customer: PaymentCustomer) -> Result<PaymentCustomer>;

    /// Inserts slots, skipping ids that already exist. Returns how many
    /// rows were new.
    async fn insert_slots(&self, slots: &[CapacitySlot]) -> Result<u64>;

    async fn get_slot(&self, id: SlotId) -> Result<Option<CapacitySlot>>;

    async fn list_slots(&self, query: SlotQuery) -> Result<Vec<CapacitySlot>>;

    /// Atomically adds `units` to a slot's reservations if capacity allows.
    async fn reserve_slot(&self, id: SlotId, units: u32) -> Result<CapacitySlot>;

    /// Atomically removes `units` from a slot's reservations, floored at zero.
    async fn release_slot(&self, id: SlotId, units: u32) -> Result<CapacitySlot>;
}

/// Extension trait providing convenience methods for booking stores.
#[async_trait]
pub trait BookingStoreExt: BookingStore {
    /// Loads an order, failing if it does not exist.
    async fn require_order(&self, id: OrderId) -> Result<Order> {
        self.get_order(id)
            .await?
            .ok_or(crate::StoreError::OrderNotFound(id))
    }

    /// Loads a saga record, failing if it does not exist.
    async fn require_saga(&self, id: SagaId) -> Result<SagaRecord> {
        self.get_saga(id)
            .await?
            .ok_or(crate::StoreError::SagaNotFound(id))
    }
}

// Blanket implementation for all BookingStore implementations
impl<T: BookingStore + ?Sized> BookingStoreExt for T {}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use domain::TimeWindow;

    use super::*;

    fn slot_at(hour: u32, service_type: ServiceType) -> CapacitySlot {
        let start = Utc.with_ymd_and_hms(2026, 10, 20, hour, 0, 0).unwrap();
        CapacitySlot::new(
            PartnerId::new(),
            service_type,
            TimeWindow::new(start, start + Duration::hours(1)).unwrap(),
            1,
        )
    }

    #[test]
    fn test_for_day_bounds() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let query = SlotQuery::for_day(ServiceType::Laundry, day);

        assert!(query.matches(&slot_at(0, ServiceType::Laundry)));
        assert!(query.matches(&slot_at(23, ServiceType::Laundry)));
        assert!(!query.matches(&slot_at(9, ServiceType::Cleaning)));

        let mut next_day = slot_at(9, ServiceType::Laundry);
        next_day.window = TimeWindow::new(
            Utc.with_ymd_and_hms(2026, 10, 21, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 21, 1, 0, 0).unwrap(),
        )
        .unwrap();
        assert!(!query.matches(&next_day));
    }

    #[test]
    fn test_only_available() {
        let mut slot = slot_at(9, ServiceType::Cleaning);
        let query = SlotQuery::new().only_available();
        assert!(query.matches(&slot));
        slot.reserve(1).unwrap();
        assert!(!query.matches(&slot));
    }
}

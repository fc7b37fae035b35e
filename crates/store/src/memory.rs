use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId, SlotId};
use domain::{CapacitySlot, Order, SagaRecord, SagaStatus};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{BookingStore, PaymentCustomer, SlotQuery},
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    sagas: HashMap<SagaId, SagaRecord>,
    customers: HashMap<String, PaymentCustomer>,
    slots: HashMap<SlotId, CapacitySlot>,
}

/// In-memory booking store implementation for testing.
///
/// This implementation keeps every table in one map set behind a single
/// lock and provides the same semantics as the PostgreSQL implementation,
/// including conditional updates.
#[derive(Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<RwLock<State>>,
    fail_on_update_order: Arc<RwLock<bool>>,
    fail_on_insert_order: Arc<RwLock<bool>>,
    fail_on_delete_order: Arc<RwLock<bool>>,
    fail_on_update_saga: Arc<RwLock<bool>>,
}

impl InMemoryBookingStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `update_order` call fail with a database error.
    pub async fn set_fail_on_update_order(&self, fail: bool) {
        *self.fail_on_update_order.write().await = fail;
    }

    /// Makes every `insert_order` call fail with a database error.
    pub async fn set_fail_on_insert_order(&self, fail: bool) {
        *self.fail_on_insert_order.write().await = fail;
    }

    /// Makes every `delete_order` call fail with a database error.
    pub async fn set_fail_on_delete_order(&self, fail: bool) {
        *self.fail_on_delete_order.write().await = fail;
    }

    /// Makes every `update_pending_saga` call fail with a database error.
    pub async fn set_fail_on_update_saga(&self, fail: bool) {
        *self.fail_on_update_saga.write().await = fail;
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }

    /// Every saga record, oldest first.
    pub async fn saga_records(&self) -> Vec<SagaRecord> {
        let mut records: Vec<_> = self.state.read().await.sagas.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn slot_count(&self) -> usize {
        self.state.read().await.slots.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = State::default();
    }
}

fn injected_failure(operation: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!(
        "injected failure on {operation}"
    )))
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        if *self.fail_on_insert_order.read().await {
            return Err(injected_failure("insert_order"));
        }
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id()) {
            return Err(StoreError::Duplicate {
                entity: "order",
                id: order.id().to_string(),
            });
        }
        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        if *self.fail_on_update_order.read().await {
            return Err(injected_failure("update_order"));
        }
        let mut state = self.state.write().await;
        let stored = state
            .orders
            .get_mut(&order.id())
            .ok_or(StoreError::OrderNotFound(order.id()))?;

        if stored.version() != order.version() {
            metrics::counter!("store_version_conflicts_total", "backend" => "memory").increment(1);
            return Err(StoreError::VersionConflict {
                order_id: order.id(),
                expected: order.version(),
                actual: stored.version(),
            });
        }

        let mut updated = order.clone();
        updated.advance_version();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_order(&self, id: OrderId) -> Result<bool> {
        if *self.fail_on_delete_order.read().await {
            return Err(injected_failure("delete_order"));
        }
        Ok(self.state.write().await.orders.remove(&id).is_some())
    }

    async fn insert_saga(&self, record: &SagaRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sagas.contains_key(&record.id) {
            return Err(StoreError::Duplicate {
                entity: "saga",
                id: record.id.to_string(),
            });
        }
        state.sagas.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_pending_saga(
        &self,
        record: &SagaRecord,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        if *self.fail_on_update_saga.read().await {
            return Err(injected_failure("update_pending_saga"));
        }
        let mut state = self.state.write().await;
        let stored = state
            .sagas
            .get_mut(&record.id)
            .ok_or(StoreError::SagaNotFound(record.id))?;
        if stored.status != SagaStatus::Pending || stored.updated_at != seen_updated_at {
            metrics::counter!("store_saga_write_conflicts_total", "backend" => "memory")
                .increment(1);
            return Ok(false);
        }
        *stored = record.clone();
        Ok(true)
    }

    async fn get_saga(&self, id: SagaId) -> Result<Option<SagaRecord>> {
        Ok(self.state.read().await.sagas.get(&id).cloned())
    }

    async fn list_stale_sagas(&self, updated_before: DateTime<Utc>) -> Result<Vec<SagaRecord>> {
        let state = self.state.read().await;
        let mut stale: Vec<_> = state
            .sagas
            .values()
            .filter(|r| r.status == SagaStatus::Pending && r.updated_at <= updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        Ok(stale)
    }

    async fn find_payment_customer(&self, identity_key: &str) -> Result<Option<PaymentCustomer>> {
        Ok(self.state.read().await.customers.get(identity_key).cloned())
    }

    async fn insert_payment_customer(&self, customer: PaymentCustomer) -> Result<PaymentCustomer> {
        let mut state = self.state.write().await;
        let stored = state
            .customers
            .entry(customer.identity_key.clone())
            .or_insert(customer);
        Ok(stored.clone())
    }

    async fn insert_slots(&self, slots: &[CapacitySlot]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for slot in slots {
            if !state.slots.contains_key(&slot.id) {
                state.slots.insert(slot.id, slot.clone());
                inserted += 1;
            }
        }
        let skipped = slots.len() as u64 - inserted;
        if skipped > 0 {
            metrics::counter!("store_slot_duplicates_total", "backend" => "memory")
                .increment(skipped);
        }
        Ok(inserted)
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<CapacitySlot>> {
        Ok(self.state.read().await.slots.get(&id).cloned())
    }

    async fn list_slots(&self, query: SlotQuery) -> Result<Vec<CapacitySlot>> {
        let state = self.state.read().await;
        let mut slots: Vec<_> = state
            .slots
            .values()
            .filter(|slot| query.matches(slot))
            .cloned()
            .collect();
        slots.sort_by_key(|slot| (slot.window.start, slot.id));
        Ok(slots)
    }

    async fn reserve_slot(&self, id: SlotId, units: u32) -> Result<CapacitySlot> {
        let mut state = self.state.write().await;
        let slot = state.slots.get_mut(&id).ok_or(StoreError::SlotNotFound(id))?;
        if let Err(err) = slot.reserve(units) {
            metrics::counter!("store_capacity_rejections_total", "backend" => "memory")
                .increment(1);
            return Err(err.into());
        }
        Ok(slot.clone())
    }

    async fn release_slot(&self, id: SlotId, units: u32) -> Result<CapacitySlot> {
        let mut state = self.state.write().await;
        let slot = state.slots.get_mut(&id).ok_or(StoreError::SlotNotFound(id))?;
        slot.release(units);
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use common::{PartnerId, UserId};
    use domain::{
        Address, BookingParams, CustomerIdentity, Money, OrderStatus, PAYMENT_SETUP, PaymentRefs,
        SagaStepKind, ServiceType, TimeWindow,
    };

    use super::*;

    fn window(hour: u32) -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2026, 10, 20, hour, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::hours(1)).unwrap()
    }

    fn draft_order() -> Order {
        let params = BookingParams {
            service_type: ServiceType::Laundry,
            estimated_amount: Money::from_cents(2500),
            payment_method_id: "pm_card_visa".into(),
            partner_id: PartnerId::new(),
            pickup_slot_id: SlotId::new(),
            pickup_window: window(9),
            delivery_slot_id: None,
            delivery_window: None,
            address: Address {
                line1: "1 Elm St".into(),
                line2: None,
                city: "Austin".into(),
                region: "TX".into(),
                postal_code: "78701".into(),
                instructions: None,
            },
            phone: None,
            details: serde_json::Value::Null,
            identity: CustomerIdentity::user(UserId::new()),
        };
        Order::draft(OrderId::new(), &params, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_get_order() {
        let store = InMemoryBookingStore::new();
        let order = draft_order();

        store.insert_order(&order).await.unwrap();
        assert_eq!(store.get_order(order.id()).await.unwrap(), Some(order.clone()));

        let dup = store.insert_order(&order).await.unwrap_err();
        assert!(matches!(dup, StoreError::Duplicate { entity: "order", .. }));
    }

    #[tokio::test]
    async fn test_update_order_is_optimistic() {
        let store = InMemoryBookingStore::new();
        let mut order = draft_order();
        store.insert_order(&order).await.unwrap();

        order
            .attach_payment(
                PaymentRefs {
                    customer_id: Some("cus_1".into()),
                    payment_method_id: Some("pm_1".into()),
                    setup_intent_id: Some("seti_1".into()),
                },
                false,
            )
            .unwrap();
        order.transition_to(OrderStatus::Ready, Utc::now()).unwrap();

        let stored = store.update_order(&order).await.unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.status(), OrderStatus::Ready);

        // Stale copy still at version 1.
        let err = store.update_order(&order).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_order_is_idempotent() {
        let store = InMemoryBookingStore::new();
        let order = draft_order();
        store.insert_order(&order).await.unwrap();

        assert!(store.delete_order(order.id()).await.unwrap());
        assert!(!store.delete_order(order.id()).await.unwrap());
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_sagas_only_pending() {
        let store = InMemoryBookingStore::new();
        let old = Utc::now() - Duration::hours(1);

        let pending = SagaRecord::new(SagaId::new(), PAYMENT_SETUP, serde_json::json!({}), old);
        let mut done = SagaRecord::new(SagaId::new(), PAYMENT_SETUP, serde_json::json!({}), old);
        done.complete(old).unwrap();
        let fresh =
            SagaRecord::new(SagaId::new(), PAYMENT_SETUP, serde_json::json!({}), Utc::now());

        for record in [&pending, &done, &fresh] {
            store.insert_saga(record).await.unwrap();
        }

        let stale = store
            .list_stale_sagas(Utc::now() - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_saga_update_is_conditional() {
        let store = InMemoryBookingStore::new();
        let start = Utc::now();
        let record = SagaRecord::new(SagaId::new(), PAYMENT_SETUP, serde_json::json!({}), start);
        store.insert_saga(&record).await.unwrap();

        let mut abandoned = record.clone();
        abandoned.fail("abandoned", start + Duration::seconds(1)).unwrap();
        let mut stepped = record.clone();
        let later = start + Duration::seconds(2);
        stepped
            .record_step(SagaStepKind::CreateOrder, serde_json::json!({}), later)
            .unwrap();

        // Both writers read the same version; only the first wins.
        assert!(store.update_pending_saga(&abandoned, start).await.unwrap());
        assert!(!store.update_pending_saga(&stepped, start).await.unwrap());
        assert!(!store
            .update_pending_saga(&stepped, abandoned.updated_at)
            .await
            .unwrap());

        let stored = store.get_saga(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SagaStatus::Failed);
        assert!(stored.steps.is_empty());

        let missing = SagaRecord::new(SagaId::new(), PAYMENT_SETUP, serde_json::json!({}), start);
        assert!(matches!(
            store.update_pending_saga(&missing, start).await,
            Err(StoreError::SagaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_customer_first_writer_wins() {
        let store = InMemoryBookingStore::new();
        let first = PaymentCustomer {
            identity_key: "guest:ann@example.com".into(),
            customer_id: "cus_first".into(),
            is_guest: true,
            created_at: Utc::now(),
        };
        let second = PaymentCustomer {
            customer_id: "cus_second".into(),
            ..first.clone()
        };

        assert_eq!(store.insert_payment_customer(first.clone()).await.unwrap(), first);
        let winner = store.insert_payment_customer(second).await.unwrap();
        assert_eq!(winner.customer_id, "cus_first");
    }

    #[tokio::test]
    async fn test_slot_reservation_is_bounded() {
        let store = InMemoryBookingStore::new();
        let slot = CapacitySlot::new(PartnerId::new(), ServiceType::Cleaning, window(10), 2);
        assert_eq!(store.insert_slots(&[slot.clone(), slot.clone()]).await.unwrap(), 1);

        store.reserve_slot(slot.id, 2).await.unwrap();
        let err = store.reserve_slot(slot.id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityExceeded { available: 0, .. }
        ));

        let released = store.release_slot(slot.id, 5).await.unwrap();
        assert_eq!(released.reserved_units, 0);

        assert!(matches!(
            store.reserve_slot(SlotId::new(), 1).await,
            Err(StoreError::SlotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overbook() {
        let store = InMemoryBookingStore::new();
        let slot = CapacitySlot::new(PartnerId::new(), ServiceType::Laundry, window(11), 5);
        store.insert_slots(std::slice::from_ref(&slot)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.reserve_slot(slot.id, 1).await }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(store.get_slot(slot.id).await.unwrap().unwrap().reserved_units, 5);
    }
}

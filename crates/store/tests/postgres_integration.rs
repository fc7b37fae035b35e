//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{OrderId, PartnerId, SagaId, SlotId, UserId};
use domain::{
    Address, BookingParams, CapacitySlot, CustomerIdentity, Money, Order, OrderStatus,
    PAYMENT_SETUP, PaymentRefs, SagaRecord, SagaStatus, SagaStepKind, ServiceType, TimeWindow,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{BookingStore, PaymentCustomer, PostgresBookingStore, SlotQuery, StoreError};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_booking_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresBookingStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, saga_records, payment_customers, capacity_slots")
        .execute(&pool)
        .await
        .unwrap();

    PostgresBookingStore::new(pool)
}

fn window(day: u32, hour: u32) -> TimeWindow {
    let start = Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap();
    TimeWindow::new(start, start + Duration::hours(2)).unwrap()
}

fn draft_order(identity: CustomerIdentity) -> Order {
    let params = BookingParams {
        service_type: ServiceType::Laundry,
        estimated_amount: Money::from_cents(4200),
        payment_method_id: "pm_card_visa".into(),
        partner_id: PartnerId::new(),
        pickup_slot_id: SlotId::new(),
        pickup_window: window(20, 9),
        delivery_slot_id: Some(SlotId::new()),
        delivery_window: Some(window(22, 15)),
        address: Address {
            line1: "9 Pine Rd".into(),
            line2: None,
            city: "Denver".into(),
            region: "CO".into(),
            postal_code: "80202".into(),
            instructions: Some("Leave at door".into()),
        },
        phone: Some("303-555-0199".into()),
        details: serde_json::json!({ "bags": 2, "detergent": "unscented" }),
        identity,
    };
    // Postgres stores microseconds; keep timestamps representable.
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
    Order::draft(OrderId::new(), &params, now)
}

#[tokio::test]
#[serial]
async fn order_round_trips_for_user_and_guest() {
    let store = get_test_store().await;

    let user_order = draft_order(CustomerIdentity::user(UserId::new()));
    let guest_order = draft_order(CustomerIdentity::guest(
        "Bo",
        "bo@example.com",
        "3035550100",
    ));

    store.insert_order(&user_order).await.unwrap();
    store.insert_order(&guest_order).await.unwrap();

    assert_eq!(
        store.get_order(user_order.id()).await.unwrap(),
        Some(user_order.clone())
    );
    assert_eq!(
        store.get_order(guest_order.id()).await.unwrap(),
        Some(guest_order)
    );

    let dup = store.insert_order(&user_order).await.unwrap_err();
    assert!(matches!(dup, StoreError::Duplicate { .. }));
}

#[tokio::test]
#[serial]
async fn update_order_uses_version() {
    let store = get_test_store().await;
    let mut order = draft_order(CustomerIdentity::user(UserId::new()));
    store.insert_order(&order).await.unwrap();

    order
        .attach_payment(
            PaymentRefs {
                customer_id: Some("cus_pg".into()),
                payment_method_id: Some("pm_pg".into()),
                setup_intent_id: Some("seti_pg".into()),
            },
            true,
        )
        .unwrap();
    order
        .transition_to(OrderStatus::Ready, order.created_at())
        .unwrap();

    let stored = store.update_order(&order).await.unwrap();
    assert_eq!(stored.version(), 2);

    let reloaded = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(reloaded.status(), OrderStatus::Ready);
    assert!(reloaded.card_validated());
    assert_eq!(reloaded.payment_refs().customer_id.as_deref(), Some("cus_pg"));

    let err = store.update_order(&order).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::VersionConflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

#[tokio::test]
#[serial]
async fn delete_order_twice() {
    let store = get_test_store().await;
    let order = draft_order(CustomerIdentity::user(UserId::new()));
    store.insert_order(&order).await.unwrap();

    assert!(store.delete_order(order.id()).await.unwrap());
    assert!(!store.delete_order(order.id()).await.unwrap());
    assert!(store.get_order(order.id()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn saga_record_lifecycle() {
    let store = get_test_store().await;
    let created = Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap();
    let mut record = SagaRecord::new(
        SagaId::new(),
        PAYMENT_SETUP,
        serde_json::json!({ "service_type": "LAUNDRY" }),
        created,
    );
    store.insert_saga(&record).await.unwrap();

    let seen = record.updated_at;
    let stepped = created + Duration::seconds(1);
    record
        .record_step(SagaStepKind::Initialize, serde_json::json!({}), stepped)
        .unwrap();
    record.order_id = Some(OrderId::new());
    assert!(store.update_pending_saga(&record, seen).await.unwrap());

    let stale = store
        .list_stale_sagas(created + Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].steps.len(), 1);
    assert_eq!(stale[0].order_id, record.order_id);

    // A writer holding the pre-step timestamp loses.
    let mut stale_copy = record.clone();
    stale_copy.fail("late writer", stepped).unwrap();
    assert!(!store.update_pending_saga(&stale_copy, seen).await.unwrap());

    record.fail("card declined", stepped).unwrap();
    assert!(store.update_pending_saga(&record, stepped).await.unwrap());

    let loaded = store.get_saga(record.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SagaStatus::Failed);
    assert_eq!(loaded.error.as_deref(), Some("card declined"));
    assert!(store
        .list_stale_sagas(created + Duration::hours(1))
        .await
        .unwrap()
        .is_empty());

    // Final records refuse any further write.
    assert!(!store.update_pending_saga(&record, loaded.updated_at).await.unwrap());
}

#[tokio::test]
#[serial]
async fn payment_customer_race_has_one_winner() {
    let store = get_test_store().await;
    let key = "user:race".to_string();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            store
                .insert_payment_customer(PaymentCustomer {
                    identity_key: key,
                    customer_id: format!("cus_{i}"),
                    is_guest: false,
                    created_at: Utc::now(),
                })
                .await
                .unwrap()
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        winners.push(handle.await.unwrap().customer_id);
    }
    winners.dedup();
    assert_eq!(winners.len(), 1);
}

#[tokio::test]
#[serial]
async fn slot_generation_is_idempotent() {
    let store = get_test_store().await;
    let partner = PartnerId::new();
    let slots: Vec<_> = (8..12)
        .map(|hour| CapacitySlot::new(partner, ServiceType::Cleaning, window(21, hour), 3))
        .collect();

    assert_eq!(store.insert_slots(&slots).await.unwrap(), 4);
    assert_eq!(store.insert_slots(&slots).await.unwrap(), 0);

    let day = chrono::NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
    let listed = store
        .list_slots(SlotQuery::for_day(ServiceType::Cleaning, day))
        .await
        .unwrap();
    assert_eq!(listed.len(), 4);
    assert!(listed.windows(2).all(|w| w[0].window.start < w[1].window.start));
}

#[tokio::test]
#[serial]
async fn concurrent_reservations_stop_at_capacity() {
    let store = get_test_store().await;
    let slot = CapacitySlot::new(PartnerId::new(), ServiceType::Laundry, window(23, 9), 3);
    store.insert_slots(std::slice::from_ref(&slot)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.reserve_slot(slot.id, 1).await }));
    }

    let mut granted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(StoreError::CapacityExceeded { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(granted, 3);
    assert_eq!(rejected, 7);

    let released = store.release_slot(slot.id, 10).await.unwrap();
    assert_eq!(released.reserved_units, 0);
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PartnerId, SagaId, SlotId, UserId};
use domain::{
    Address, CapacitySlot, CustomerIdentity, DomainError, GuestContact, Money, Order, OrderParts,
    OrderStatus, PaymentRefs, RecordedStep, SagaRecord, SagaStatus, ServiceType, TimeWindow,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{BookingStore, PaymentCustomer, SlotQuery},
};

const ORDER_COLUMNS: &str = "id, service_type, status, subtotal_cents, total_cents, partner_id, \
     pickup_slot_id, pickup_start, pickup_end, delivery_slot_id, delivery_start, delivery_end, \
     address, phone, details, user_id, guest_name, guest_email, guest_phone, customer_id, \
     payment_method_id, setup_intent_id, card_validated, paid_at, version, created_at, updated_at";

const SAGA_COLUMNS: &str =
    "id, saga_type, status, steps, input, order_id, error, created_at, updated_at, completed_at";

const SLOT_COLUMNS: &str =
    "id, partner_id, service_type, window_start, window_end, max_units, reserved_units";

/// PostgreSQL-backed booking store implementation.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Creates a new PostgreSQL booking store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let service_type: ServiceType = parse_column(&row, "service_type")?;
        let status: OrderStatus = parse_column(&row, "status")?;

        let delivery_window = match (
            row.try_get::<Option<DateTime<Utc>>, _>("delivery_start")?,
            row.try_get::<Option<DateTime<Utc>>, _>("delivery_end")?,
        ) {
            (Some(start), Some(end)) => {
                Some(TimeWindow::new(start, end).map_err(DomainError::from)?)
            }
            _ => None,
        };

        let identity = match row.try_get::<Option<Uuid>, _>("user_id")? {
            Some(user_id) => CustomerIdentity::user(UserId::from_uuid(user_id)),
            None => {
                let (Some(name), Some(email), Some(phone)) = (
                    row.try_get::<Option<String>, _>("guest_name")?,
                    row.try_get::<Option<String>, _>("guest_email")?,
                    row.try_get::<Option<String>, _>("guest_phone")?,
                ) else {
                    return Err(StoreError::InvalidRow {
                        table: "orders",
                        reason: "neither user nor complete guest identity",
                    });
                };
                CustomerIdentity::Guest(GuestContact { name, email, phone })
            }
        };

        let address: Address = serde_json::from_value(row.try_get("address")?)?;

        let parts = OrderParts {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            service_type,
            status,
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            partner_id: PartnerId::from_uuid(row.try_get::<Uuid, _>("partner_id")?),
            pickup_slot_id: SlotId::from_uuid(row.try_get::<Uuid, _>("pickup_slot_id")?),
            pickup_window: TimeWindow::new(row.try_get("pickup_start")?, row.try_get("pickup_end")?)
                .map_err(DomainError::from)?,
            delivery_slot_id: row
                .try_get::<Option<Uuid>, _>("delivery_slot_id")?
                .map(SlotId::from_uuid),
            delivery_window,
            address,
            phone: row.try_get("phone")?,
            details: row.try_get("details")?,
            identity,
            payment: PaymentRefs {
                customer_id: row.try_get("customer_id")?,
                payment_method_id: row.try_get("payment_method_id")?,
                setup_intent_id: row.try_get("setup_intent_id")?,
            },
            card_validated: row.try_get("card_validated")?,
            paid_at: row.try_get("paid_at")?,
            version: row.try_get::<i64, _>("version")? as u64,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };

        Order::from_parts(parts).map_err(|e| StoreError::Corrupt(e.into()))
    }

    fn row_to_saga(row: PgRow) -> Result<SagaRecord> {
        let status: SagaStatus = parse_column(&row, "status")?;
        let steps: Vec<RecordedStep> = serde_json::from_value(row.try_get("steps")?)?;

        Ok(SagaRecord {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_type: row.try_get("saga_type")?,
            status,
            steps,
            input: row.try_get("input")?,
            order_id: row.try_get::<Option<Uuid>, _>("order_id")?.map(OrderId::from_uuid),
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_slot(row: PgRow) -> Result<CapacitySlot> {
        let window = TimeWindow::new(row.try_get("window_start")?, row.try_get("window_end")?)
            .map_err(DomainError::from)?;

        Ok(CapacitySlot {
            id: SlotId::from_uuid(row.try_get::<Uuid, _>("id")?),
            partner_id: PartnerId::from_uuid(row.try_get::<Uuid, _>("partner_id")?),
            service_type: parse_column(&row, "service_type")?,
            window,
            max_units: row.try_get::<i32, _>("max_units")? as u32,
            reserved_units: row.try_get::<i32, _>("reserved_units")? as u32,
        })
    }

    fn row_to_customer(row: PgRow) -> Result<PaymentCustomer> {
        Ok(PaymentCustomer {
            identity_key: row.try_get("identity_key")?,
            customer_id: row.try_get("customer_id")?,
            is_guest: row.try_get("is_guest")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Reads a text column and parses it into a domain enum.
fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = domain::UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(DomainError::from(e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let identity = order.identity();
        let guest = identity.guest_contact();
        let refs = order.payment_refs();

        sqlx::query(&format!(
            r#"
            INSERT INTO orders ({ORDER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
            "#
        ))
        .bind(order.id().as_uuid())
        .bind(order.service_type().as_str())
        .bind(order.status().as_str())
        .bind(order.subtotal().cents())
        .bind(order.total().cents())
        .bind(order.partner_id().as_uuid())
        .bind(order.pickup_slot_id().as_uuid())
        .bind(order.pickup_window().start)
        .bind(order.pickup_window().end)
        .bind(order.delivery_slot_id().map(|id| id.as_uuid()))
        .bind(order.delivery_window().map(|w| w.start))
        .bind(order.delivery_window().map(|w| w.end))
        .bind(serde_json::to_value(order.address())?)
        .bind(order.phone())
        .bind(order.details())
        .bind(identity.user_id().map(|id| id.as_uuid()))
        .bind(guest.map(|g| g.name.as_str()))
        .bind(guest.map(|g| g.email.as_str()))
        .bind(guest.map(|g| g.phone.as_str()))
        .bind(refs.customer_id.as_deref())
        .bind(refs.payment_method_id.as_deref())
        .bind(refs.setup_intent_id.as_deref())
        .bind(order.card_validated())
        .bind(order.paid_at())
        .bind(order.version() as i64)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StoreError::Duplicate {
                    entity: "order",
                    id: order.id().to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        let refs = order.payment_refs();

        // Identity, address, schedule and creation time are fixed at booking.
        let updated = sqlx::query(
            r#"
            UPDATE orders SET
                status = $3,
                subtotal_cents = $4,
                total_cents = $5,
                customer_id = $6,
                payment_method_id = $7,
                setup_intent_id = $8,
                card_validated = $9,
                paid_at = $10,
                updated_at = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.version() as i64)
        .bind(order.status().as_str())
        .bind(order.subtotal().cents())
        .bind(order.total().cents())
        .bind(refs.customer_id.as_deref())
        .bind(refs.payment_method_id.as_deref())
        .bind(refs.setup_intent_id.as_deref())
        .bind(order.card_validated())
        .bind(order.paid_at())
        .bind(order.updated_at())
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            let mut stored = order.clone();
            stored.advance_version();
            return Ok(stored);
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order.id().as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            Some(actual) => {
                metrics::counter!("store_version_conflicts_total", "backend" => "postgres")
                    .increment(1);
                tracing::debug!(
                    order_id = %order.id(),
                    expected = order.version(),
                    actual,
                    "order version conflict"
                );
                Err(StoreError::VersionConflict {
                    order_id: order.id(),
                    expected: order.version(),
                    actual: actual as u64,
                })
            }
            None => Err(StoreError::OrderNotFound(order.id())),
        }
    }

    async fn delete_order(&self, id: OrderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_saga(&self, record: &SagaRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO saga_records ({SAGA_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(record.id.as_uuid())
        .bind(&record.saga_type)
        .bind(record.status.as_str())
        .bind(serde_json::to_value(&record.steps)?)
        .bind(&record.input)
        .bind(record.order_id.map(|id| id.as_uuid()))
        .bind(record.error.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StoreError::Duplicate {
                    entity: "saga",
                    id: record.id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn update_pending_saga(
        &self,
        record: &SagaRecord,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE saga_records SET
                status = $3,
                steps = $4,
                order_id = $5,
                error = $6,
                updated_at = $7,
                completed_at = $8
            WHERE id = $1 AND status = 'pending' AND updated_at = $2
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(seen_updated_at)
        .bind(record.status.as_str())
        .bind(serde_json::to_value(&record.steps)?)
        .bind(record.order_id.map(|id| id.as_uuid()))
        .bind(record.error.as_deref())
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM saga_records WHERE id = $1")
            .bind(record.id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => {
                metrics::counter!("store_saga_write_conflicts_total", "backend" => "postgres")
                    .increment(1);
                tracing::debug!(saga_id = %record.id, "saga record changed since it was read");
                Ok(false)
            }
            None => Err(StoreError::SagaNotFound(record.id)),
        }
    }

    async fn get_saga(&self, id: SagaId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!("SELECT {SAGA_COLUMNS} FROM saga_records WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn list_stale_sagas(&self, updated_before: DateTime<Utc>) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SAGA_COLUMNS}
            FROM saga_records
            WHERE status = 'pending' AND updated_at <= $1
            ORDER BY updated_at ASC
            "#
        ))
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn find_payment_customer(&self, identity_key: &str) -> Result<Option<PaymentCustomer>> {
        let row = sqlx::query(
            "SELECT identity_key, customer_id, is_guest, created_at FROM payment_customers WHERE identity_key = $1",
        )
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_customer).transpose()
    }

    async fn insert_payment_customer(&self, customer: PaymentCustomer) -> Result<PaymentCustomer> {
        sqlx::query(
            r#"
            INSERT INTO payment_customers (identity_key, customer_id, is_guest, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity_key) DO NOTHING
            "#,
        )
        .bind(&customer.identity_key)
        .bind(&customer.customer_id)
        .bind(customer.is_guest)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;

        // Read back so a losing writer sees the winner's customer.
        self.find_payment_customer(&customer.identity_key)
            .await?
            .ok_or(StoreError::InvalidRow {
                table: "payment_customers",
                reason: "mapping vanished after insert",
            })
    }

    async fn insert_slots(&self, slots: &[CapacitySlot]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for slot in slots {
            let result = sqlx::query(&format!(
                "INSERT INTO capacity_slots ({SLOT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT DO NOTHING"
            ))
            .bind(slot.id.as_uuid())
            .bind(slot.partner_id.as_uuid())
            .bind(slot.service_type.as_str())
            .bind(slot.window.start)
            .bind(slot.window.end)
            .bind(slot.max_units as i32)
            .bind(slot.reserved_units as i32)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        let skipped = slots.len() as u64 - inserted;
        if skipped > 0 {
            metrics::counter!("store_slot_duplicates_total", "backend" => "postgres")
                .increment(skipped);
        }
        Ok(inserted)
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<CapacitySlot>> {
        let row = sqlx::query(&format!("SELECT {SLOT_COLUMNS} FROM capacity_slots WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_slot).transpose()
    }

    async fn list_slots(&self, query: SlotQuery) -> Result<Vec<CapacitySlot>> {
        let mut sql = format!("SELECT {SLOT_COLUMNS} FROM capacity_slots WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.service_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND service_type = ${param_count}"));
        }
        if query.partner_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND partner_id = ${param_count}"));
        }
        if query.from.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND window_start >= ${param_count}"));
        }
        if query.to.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND window_start < ${param_count}"));
        }
        if query.only_available {
            sql.push_str(" AND reserved_units < max_units");
        }
        sql.push_str(" ORDER BY window_start ASC, id ASC");

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(service_type) = query.service_type {
            sqlx_query = sqlx_query.bind(service_type.as_str());
        }
        if let Some(partner_id) = query.partner_id {
            sqlx_query = sqlx_query.bind(partner_id.as_uuid());
        }
        if let Some(from) = query.from {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.to {
            sqlx_query = sqlx_query.bind(to);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_slot).collect()
    }

    async fn reserve_slot(&self, id: SlotId, units: u32) -> Result<CapacitySlot> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE capacity_slots
            SET reserved_units = reserved_units + $2
            WHERE id = $1 AND reserved_units + $2 <= max_units
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(units as i32)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_slot(row);
        }

        match self.get_slot(id).await? {
            Some(slot) => {
                metrics::counter!("store_capacity_rejections_total", "backend" => "postgres")
                    .increment(1);
                Err(StoreError::CapacityExceeded {
                    slot_id: id,
                    requested: units,
                    available: slot.available_units(),
                })
            }
            None => Err(StoreError::SlotNotFound(id)),
        }
    }

    async fn release_slot(&self, id: SlotId, units: u32) -> Result<CapacitySlot> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE capacity_slots
            SET reserved_units = GREATEST(reserved_units - $2, 0)
            WHERE id = $1
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(units as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_slot(row),
            None => Err(StoreError::SlotNotFound(id)),
        }
    }
}

//! The order entity.

use chrono::{DateTime, Utc};
use common::{OrderId, PartnerId, SlotId};
use serde::{Deserialize, Serialize};

use crate::booking::BookingParams;
use crate::money::Money;

use super::transitions;
use super::{
    Address, CustomerIdentity, OrderError, OrderStatus, PaymentRefs, ServiceType, TimeWindow,
};

/// A booked order.
///
/// Fields are private; every mutation goes through a method that checks
/// the order's invariants. Stores rebuild orders with [`Order::from_parts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    service_type: ServiceType,
    status: OrderStatus,
    subtotal: Money,
    total: Money,
    partner_id: PartnerId,
    pickup_slot_id: SlotId,
    pickup_window: TimeWindow,
    delivery_slot_id: Option<SlotId>,
    delivery_window: Option<TimeWindow>,
    address: Address,
    phone: Option<String>,
    details: serde_json::Value,
    identity: CustomerIdentity,
    payment: PaymentRefs,
    card_validated: bool,
    paid_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter, bumped by the store on every update.
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Every stored field of an order, used to rebuild one from persistence.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub service_type: ServiceType,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub total: Money,
    pub partner_id: PartnerId,
    pub pickup_slot_id: SlotId,
    pub pickup_window: TimeWindow,
    pub delivery_slot_id: Option<SlotId>,
    pub delivery_window: Option<TimeWindow>,
    pub address: Address,
    pub phone: Option<String>,
    pub details: serde_json::Value,
    pub identity: CustomerIdentity,
    pub payment: PaymentRefs,
    pub card_validated: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the draft order the payment-setup saga inserts first.
    ///
    /// Subtotal and total both start at the estimated amount.
    pub fn draft(id: OrderId, params: &BookingParams, now: DateTime<Utc>) -> Self {
        Self {
            id,
            service_type: params.service_type,
            status: OrderStatus::Draft,
            subtotal: params.estimated_amount,
            total: params.estimated_amount,
            partner_id: params.partner_id,
            pickup_slot_id: params.pickup_slot_id,
            pickup_window: params.pickup_window,
            delivery_slot_id: params.delivery_slot_id,
            delivery_window: params.delivery_window,
            address: params.address.clone(),
            phone: params.phone.clone(),
            details: params.details.clone(),
            identity: params.identity.clone(),
            payment: PaymentRefs::default(),
            card_validated: false,
            paid_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds an order from stored fields, re-checking amount invariants.
    pub fn from_parts(parts: OrderParts) -> Result<Self, OrderError> {
        if parts.total < parts.subtotal {
            return Err(OrderError::TotalBelowSubtotal {
                total: parts.total,
                subtotal: parts.subtotal,
            });
        }
        Ok(Self {
            id: parts.id,
            service_type: parts.service_type,
            status: parts.status,
            subtotal: parts.subtotal,
            total: parts.total,
            partner_id: parts.partner_id,
            pickup_slot_id: parts.pickup_slot_id,
            pickup_window: parts.pickup_window,
            delivery_slot_id: parts.delivery_slot_id,
            delivery_window: parts.delivery_window,
            address: parts.address,
            phone: parts.phone,
            details: parts.details,
            identity: parts.identity,
            payment: parts.payment,
            card_validated: parts.card_validated,
            paid_at: parts.paid_at,
            version: parts.version,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        })
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn partner_id(&self) -> PartnerId {
        self.partner_id
    }

    pub fn pickup_slot_id(&self) -> SlotId {
        self.pickup_slot_id
    }

    pub fn pickup_window(&self) -> TimeWindow {
        self.pickup_window
    }

    pub fn delivery_slot_id(&self) -> Option<SlotId> {
        self.delivery_slot_id
    }

    pub fn delivery_window(&self) -> Option<TimeWindow> {
        self.delivery_window
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn details(&self) -> &serde_json::Value {
        &self.details
    }

    pub fn identity(&self) -> &CustomerIdentity {
        &self.identity
    }

    pub fn payment_refs(&self) -> &PaymentRefs {
        &self.payment
    }

    pub fn card_validated(&self) -> bool {
        self.card_validated
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the statuses this order could move to next, ignoring guards.
    pub fn next_statuses(&self) -> Vec<OrderStatus> {
        transitions::next_statuses(self.status, self.service_type)
    }
}

// Mutations
impl Order {
    /// Moves the order to `to` if the transition table allows it.
    pub fn transition_to(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        transitions::validate_transition(self.status, to, self.service_type, Some(self))?;
        if self.status != to {
            self.status = to;
            self.updated_at = now;
        }
        Ok(())
    }

    /// Attaches gateway references produced by the payment-setup saga.
    pub fn attach_payment(
        &mut self,
        refs: PaymentRefs,
        card_validated: bool,
    ) -> Result<(), OrderError> {
        self.ensure_mutable()?;
        self.payment = refs;
        self.card_validated = card_validated;
        Ok(())
    }

    /// Records when payment for the order was captured.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> Result<(), OrderError> {
        self.ensure_mutable()?;
        self.paid_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Sets the final total, which may never drop below the subtotal.
    pub fn set_total(&mut self, total: Money, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.ensure_mutable()?;
        if total < self.subtotal {
            return Err(OrderError::TotalBelowSubtotal {
                total,
                subtotal: self.subtotal,
            });
        }
        self.total = total;
        self.updated_at = now;
        Ok(())
    }

    /// Bumps the concurrency counter. Stores call this after a successful
    /// conditional write.
    pub fn advance_version(&mut self) {
        self.version += 1;
    }

    fn ensure_mutable(&self) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalStatus {
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::order::test_support::draft_order;
    use crate::order::TransitionError;

    fn attach_refs(order: &mut Order) {
        order
            .attach_payment(
                PaymentRefs {
                    customer_id: Some("cus_1".into()),
                    payment_method_id: Some("pm_1".into()),
                    setup_intent_id: Some("seti_1".into()),
                },
                true,
            )
            .unwrap();
    }

    #[test]
    fn test_draft_starts_with_estimate() {
        let order = draft_order(ServiceType::Laundry);
        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.subtotal(), order.total());
        assert_eq!(order.version(), 1);
        assert!(!order.card_validated());
        assert_eq!(order.payment_refs(), &PaymentRefs::default());
    }

    #[test]
    fn test_transition_follows_table() {
        let mut order = draft_order(ServiceType::Laundry);
        let err = order.transition_to(OrderStatus::Ready, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::Transition(TransitionError::NoRule { .. })
        ));

        attach_refs(&mut order);
        order.transition_to(OrderStatus::Ready, Utc::now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Ready);
        assert!(order.card_validated());
    }

    #[test]
    fn test_terminal_order_rejects_mutation() {
        let mut order = draft_order(ServiceType::Cleaning);
        order.transition_to(OrderStatus::Canceled, Utc::now()).unwrap();

        assert!(matches!(
            order.mark_paid(Utc::now()),
            Err(OrderError::TerminalStatus { .. })
        ));
        assert!(matches!(
            order.transition_to(OrderStatus::Draft, Utc::now()),
            Err(OrderError::Transition(TransitionError::Terminal { .. }))
        ));
        assert!(order.set_total(Money::from_cents(9000), Utc::now()).is_err());
    }

    #[test]
    fn test_total_never_below_subtotal() {
        let mut order = draft_order(ServiceType::Laundry);
        let subtotal = order.subtotal();

        let err = order
            .set_total(Money::from_cents(subtotal.cents() - 1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrderError::TotalBelowSubtotal { .. }));

        order
            .set_total(Money::from_cents(subtotal.cents() + 750), Utc::now())
            .unwrap();
        assert_eq!(order.total().cents(), subtotal.cents() + 750);
    }

    #[test]
    fn test_from_parts_checks_amounts() {
        let order = draft_order(ServiceType::Laundry);
        let parts = OrderParts {
            id: order.id(),
            service_type: order.service_type(),
            status: order.status(),
            subtotal: Money::from_cents(5000),
            total: Money::from_cents(4000),
            partner_id: order.partner_id(),
            pickup_slot_id: order.pickup_slot_id(),
            pickup_window: order.pickup_window(),
            delivery_slot_id: None,
            delivery_window: None,
            address: order.address().clone(),
            phone: None,
            details: serde_json::Value::Null,
            identity: order.identity().clone(),
            payment: PaymentRefs::default(),
            card_validated: false,
            paid_at: None,
            version: 3,
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        };
        assert!(Order::from_parts(parts).is_err());
    }

    #[test]
    fn test_advance_version() {
        let mut order = draft_order(ServiceType::Laundry);
        order.advance_version();
        order.advance_version();
        assert_eq!(order.version(), 3);
    }
}

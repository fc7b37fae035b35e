//! Integration tests for the order lifecycle.
//!
//! These tests drive orders through complete fulfillment flows using only the
//! public API, the way stores and services use it.

use chrono::{Duration, TimeZone, Utc};
use common::{OrderId, PartnerId, SlotId, UserId};
use domain::order::transitions;
use domain::{
    Address, BookingParams, CustomerIdentity, Money, Order, OrderError, OrderStatus, PaymentRefs,
    ServiceType, TimeWindow, TransitionError,
};

fn params(service_type: ServiceType) -> BookingParams {
    let start = Utc.with_ymd_and_hms(2026, 11, 2, 14, 0, 0).unwrap();
    BookingParams {
        service_type,
        estimated_amount: Money::from_cents(3500),
        payment_method_id: "pm_card_visa".into(),
        partner_id: PartnerId::new(),
        pickup_slot_id: SlotId::new(),
        pickup_window: TimeWindow::new(start, start + Duration::hours(2)).unwrap(),
        delivery_slot_id: None,
        delivery_window: None,
        address: Address {
            line1: "400 Oak Ave".into(),
            line2: Some("Apt 3".into()),
            city: "Portland".into(),
            region: "OR".into(),
            postal_code: "97201".into(),
            instructions: Some("Ring twice".into()),
        },
        phone: Some("503-555-0100".into()),
        details: serde_json::json!({ "bags": 3 }),
        identity: CustomerIdentity::user(UserId::new()),
    }
}

fn ready_order(service_type: ServiceType) -> Order {
    let mut order = Order::draft(OrderId::new(), &params(service_type), Utc::now());
    order
        .attach_payment(
            PaymentRefs {
                customer_id: Some("cus_1".into()),
                payment_method_id: Some("pm_card_visa".into()),
                setup_intent_id: Some("seti_1".into()),
            },
            true,
        )
        .unwrap();
    order.transition_to(OrderStatus::Ready, Utc::now()).unwrap();
    order
}

mod laundry_flow {
    use super::*;

    #[test]
    fn full_flow_reaches_delivered() {
        let mut order = ready_order(ServiceType::Laundry);
        let now = Utc::now();

        order.transition_to(OrderStatus::PickedUp, now).unwrap();
        order.transition_to(OrderStatus::AtFacility, now).unwrap();

        // Weighed: final total exceeds the estimate.
        order.set_total(Money::from_cents(4125), now).unwrap();
        order.transition_to(OrderStatus::QuoteSent, now).unwrap();
        order.transition_to(OrderStatus::AwaitingPayment, now).unwrap();

        // Payment declined once, then retried.
        order.transition_to(OrderStatus::PaymentFailed, now).unwrap();
        order.transition_to(OrderStatus::AwaitingPayment, now).unwrap();

        let err = order
            .transition_to(OrderStatus::PaidProcessing, now)
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::Transition(TransitionError::NoRule { .. })
        ));

        order.mark_paid(now).unwrap();
        order.transition_to(OrderStatus::PaidProcessing, now).unwrap();
        order.transition_to(OrderStatus::OutForDelivery, now).unwrap();
        order.transition_to(OrderStatus::Delivered, now).unwrap();

        assert!(order.is_terminal());
        assert!(order.next_statuses().is_empty());
        assert_eq!(order.total().cents(), 4125);
    }

    #[test]
    fn cannot_cancel_after_payment() {
        let mut order = ready_order(ServiceType::Laundry);
        let now = Utc::now();
        for to in [
            OrderStatus::PickedUp,
            OrderStatus::AtFacility,
            OrderStatus::QuoteSent,
            OrderStatus::AwaitingPayment,
        ] {
            order.transition_to(to, now).unwrap();
        }
        order.mark_paid(now).unwrap();
        order.transition_to(OrderStatus::PaidProcessing, now).unwrap();

        assert!(order.transition_to(OrderStatus::Canceled, now).is_err());
        assert_eq!(order.status(), OrderStatus::PaidProcessing);
    }
}

mod cleaning_flow {
    use super::*;

    #[test]
    fn full_flow_reaches_completed() {
        let mut order = ready_order(ServiceType::Cleaning);
        let now = Utc::now();

        assert!(order.transition_to(OrderStatus::PickedUp, now).is_err());

        order.mark_paid(now).unwrap();
        order.transition_to(OrderStatus::Paid, now).unwrap();
        order.transition_to(OrderStatus::EnRoute, now).unwrap();
        order.transition_to(OrderStatus::OnSite, now).unwrap();
        order.transition_to(OrderStatus::Completed, now).unwrap();

        assert!(order.is_terminal());
    }

    #[test]
    fn canceled_order_is_frozen() {
        let mut order = ready_order(ServiceType::Cleaning);
        let now = Utc::now();
        order.transition_to(OrderStatus::Canceled, now).unwrap();

        for to in OrderStatus::ALL {
            if to == OrderStatus::Canceled {
                continue;
            }
            assert!(order.transition_to(to, now).is_err(), "{to}");
        }
        assert!(order.mark_paid(now).is_err());
        assert_eq!(order.status(), OrderStatus::Canceled);
    }
}

mod table {
    use super::*;

    #[test]
    fn every_rule_names_a_non_terminal_source() {
        for rule in transitions::rules() {
            assert!(!transitions::is_terminal(rule.from), "{}", rule.from);
            assert_ne!(rule.from, rule.to);
        }
    }

    #[test]
    fn order_serializes_for_storage() {
        let order = ready_order(ServiceType::Laundry);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["service_type"], "LAUNDRY");
        assert_eq!(json["subtotal"], 3500);

        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}

use chrono::{Duration, TimeZone, Utc};
use common::{OrderId, PartnerId, SlotId, UserId};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use domain::order::transitions;
use domain::{
    Address, BookingParams, CustomerIdentity, Money, Order, OrderStatus, PaymentRefs, ServiceType,
    TimeWindow,
};

fn params() -> BookingParams {
    let start = Utc.with_ymd_and_hms(2026, 10, 20, 9, 0, 0).unwrap();
    BookingParams {
        service_type: ServiceType::Laundry,
        estimated_amount: Money::from_cents(4200),
        payment_method_id: "pm_bench".into(),
        partner_id: PartnerId::new(),
        pickup_slot_id: SlotId::new(),
        pickup_window: TimeWindow::new(start, start + Duration::hours(2)).unwrap(),
        delivery_slot_id: None,
        delivery_window: None,
        address: Address {
            line1: "1 Bench Way".into(),
            line2: None,
            city: "Springfield".into(),
            region: "IL".into(),
            postal_code: "62701".into(),
            instructions: None,
        },
        phone: None,
        details: serde_json::json!({}),
        identity: CustomerIdentity::user(UserId::new()),
    }
}

fn bench_can_transition(c: &mut Criterion) {
    let mut order = Order::draft(OrderId::new(), &params(), Utc::now());
    order.mark_paid(Utc::now()).unwrap();

    c.bench_function("domain/can_transition_guarded", |b| {
        b.iter(|| {
            transitions::can_transition(
                black_box(OrderStatus::AwaitingPayment),
                black_box(OrderStatus::PaidProcessing),
                ServiceType::Laundry,
                Some(&order),
            )
        });
    });
}

fn bench_next_statuses(c: &mut Criterion) {
    c.bench_function("domain/next_statuses_all", |b| {
        b.iter(|| {
            for service_type in ServiceType::ALL {
                for status in OrderStatus::ALL {
                    black_box(transitions::next_statuses(status, service_type));
                }
            }
        });
    });
}

fn bench_full_laundry_flow(c: &mut Criterion) {
    let params = params();

    c.bench_function("domain/full_laundry_flow", |b| {
        b.iter(|| {
            let now = Utc::now();
            let mut order = Order::draft(OrderId::new(), &params, now);
            order
                .attach_payment(
                    PaymentRefs {
                        customer_id: Some("cus_bench".into()),
                        payment_method_id: Some("pm_bench".into()),
                        setup_intent_id: Some("seti_bench".into()),
                    },
                    true,
                )
                .unwrap();
            for to in [
                OrderStatus::Ready,
                OrderStatus::PickedUp,
                OrderStatus::AtFacility,
                OrderStatus::QuoteSent,
                OrderStatus::AwaitingPayment,
            ] {
                order.transition_to(to, now).unwrap();
            }
            order.mark_paid(now).unwrap();
            for to in [
                OrderStatus::PaidProcessing,
                OrderStatus::OutForDelivery,
                OrderStatus::Delivered,
            ] {
                order.transition_to(to, now).unwrap();
            }
            black_box(order)
        });
    });
}

fn bench_validate_params(c: &mut Criterion) {
    let params = params();

    c.bench_function("domain/validate_booking_params", |b| {
        b.iter(|| black_box(&params).validate())
    });
}

criterion_group!(
    benches,
    bench_can_transition,
    bench_next_statuses,
    bench_full_laundry_flow,
    bench_validate_params,
);
criterion_main!(benches);

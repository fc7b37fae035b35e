//! Legal order status transitions.
//!
//! The table is static and every function here is pure: the same inputs
//! always produce the same answer. Guards read only fields of the order
//! passed in; none of them consult a clock.

use thiserror::Error;

use super::{Order, OrderStatus, ServiceType};

/// Business condition a transition requires of the order.
pub type Guard = fn(&Order) -> bool;

/// One edge of the transition graph.
///
/// `service_type: None` applies to every service type.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub service_type: Option<ServiceType>,
    pub guard: Option<Guard>,
}

impl TransitionRule {
    const fn new(
        from: OrderStatus,
        to: OrderStatus,
        service_type: Option<ServiceType>,
        guard: Option<Guard>,
    ) -> Self {
        Self {
            from,
            to,
            service_type,
            guard,
        }
    }

    fn applies_to(&self, from: OrderStatus, to: OrderStatus, service_type: ServiceType) -> bool {
        self.from == from
            && self.to == to
            && self.service_type.is_none_or(|scoped| scoped == service_type)
    }

    fn guard_holds(&self, order: Option<&Order>) -> bool {
        match (self.guard, order) {
            (None, _) => true,
            (Some(guard), Some(order)) => guard(order),
            (Some(_), None) => false,
        }
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The current status is terminal.
    #[error("order is in terminal status {from}; no transitions are possible")]
    Terminal { from: OrderStatus },

    /// No rule matches, or the matching rule's guard rejected the order.
    #[error("no transition from {from} to {to} for {service_type} orders")]
    NoRule {
        from: OrderStatus,
        to: OrderStatus,
        service_type: ServiceType,
    },
}

mod guards {
    use super::Order;

    pub(super) fn payment_attached(order: &Order) -> bool {
        let refs = order.payment_refs();
        refs.payment_method_id.is_some() && refs.setup_intent_id.is_some()
    }

    pub(super) fn quoted(order: &Order) -> bool {
        order.total().is_positive()
    }

    pub(super) fn paid(order: &Order) -> bool {
        order.paid_at().is_some()
    }
}

use OrderStatus::*;
use ServiceType::{Cleaning, Laundry};

const TERMINAL: [OrderStatus; 3] = [Delivered, Completed, Canceled];

static RULES: &[TransitionRule] = &[
    // Saga commit point, shared.
    TransitionRule::new(Draft, Ready, None, Some(guards::payment_attached)),
    // Laundry: pickup, weigh, quote, pay, deliver.
    TransitionRule::new(Ready, PickedUp, Some(Laundry), None),
    TransitionRule::new(PickedUp, AtFacility, Some(Laundry), None),
    TransitionRule::new(AtFacility, QuoteSent, Some(Laundry), Some(guards::quoted)),
    TransitionRule::new(QuoteSent, AwaitingPayment, Some(Laundry), None),
    TransitionRule::new(
        AwaitingPayment,
        PaidProcessing,
        Some(Laundry),
        Some(guards::paid),
    ),
    TransitionRule::new(AwaitingPayment, PaymentFailed, Some(Laundry), None),
    TransitionRule::new(PaymentFailed, AwaitingPayment, Some(Laundry), None),
    TransitionRule::new(PaidProcessing, OutForDelivery, Some(Laundry), None),
    TransitionRule::new(OutForDelivery, Delivered, Some(Laundry), None),
    // Cleaning: pay, then serve.
    TransitionRule::new(Ready, Paid, Some(Cleaning), Some(guards::paid)),
    TransitionRule::new(Paid, EnRoute, Some(Cleaning), None),
    TransitionRule::new(EnRoute, OnSite, Some(Cleaning), None),
    TransitionRule::new(OnSite, Completed, Some(Cleaning), None),
    // Cancellation, from every status before payment is committed.
    TransitionRule::new(Draft, Canceled, None, None),
    TransitionRule::new(Ready, Canceled, None, None),
    TransitionRule::new(PickedUp, Canceled, None, None),
    TransitionRule::new(AtFacility, Canceled, None, None),
    TransitionRule::new(QuoteSent, Canceled, None, None),
    TransitionRule::new(AwaitingPayment, Canceled, None, None),
    TransitionRule::new(PaymentFailed, Canceled, None, None),
];

/// Returns the full rule table.
pub fn rules() -> &'static [TransitionRule] {
    RULES
}

/// Returns true if `status` is terminal.
pub fn is_terminal(status: OrderStatus) -> bool {
    TERMINAL.contains(&status)
}

/// Returns true iff a rule matches and its guard (if any) holds for `order`.
///
/// A guarded rule never matches when no order is supplied.
pub fn can_transition(
    from: OrderStatus,
    to: OrderStatus,
    service_type: ServiceType,
    order: Option<&Order>,
) -> bool {
    if is_terminal(from) {
        return false;
    }
    RULES
        .iter()
        .any(|rule| rule.applies_to(from, to, service_type) && rule.guard_holds(order))
}

/// Statuses reachable from `current` by one rule, ignoring guards.
///
/// Intended for hinting; enforcement goes through [`validate_transition`].
pub fn next_statuses(current: OrderStatus, service_type: ServiceType) -> Vec<OrderStatus> {
    let mut next = Vec::new();
    for rule in RULES {
        if rule.from == current
            && rule.service_type.is_none_or(|scoped| scoped == service_type)
            && !next.contains(&rule.to)
        {
            next.push(rule.to);
        }
    }
    next
}

/// Checks a transition, treating `from == to` as always valid.
pub fn validate_transition(
    from: OrderStatus,
    to: OrderStatus,
    service_type: ServiceType,
    order: Option<&Order>,
) -> Result<(), TransitionError> {
    if from == to {
        return Ok(());
    }
    if is_terminal(from) {
        return Err(TransitionError::Terminal { from });
    }
    if can_transition(from, to, service_type, order) {
        Ok(())
    } else {
        Err(TransitionError::NoRule {
            from,
            to,
            service_type,
        })
    }
}

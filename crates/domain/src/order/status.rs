//! Order statuses and service types.

use serde::{Deserialize, Serialize};

use super::transitions;

/// The category of service an order books.
///
/// The two categories run disjoint fulfillment flows (see
/// [`transitions`](super::transitions)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    /// Pickup, wash at a facility, deliver back. Priced after weighing.
    Laundry,
    /// On-site cleaning, paid before the visit.
    Cleaning,
}

impl ServiceType {
    /// All service types.
    pub const ALL: [ServiceType; 2] = [ServiceType::Laundry, ServiceType::Cleaning];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Laundry => "LAUNDRY",
            ServiceType::Cleaning => "CLEANING",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LAUNDRY" => Ok(ServiceType::Laundry),
            "CLEANING" => Ok(ServiceType::Cleaning),
            other => Err(UnknownVariant {
                kind: "service type",
                value: other.to_string(),
            }),
        }
    }
}

/// The status of an order in its lifecycle.
///
/// ```text
///            ┌─► picked_up ─► at_facility ─► quote_sent ─► awaiting_payment ─┬─► paid_processing ─► out_for_delivery ─► delivered
/// draft ─► ready                                                 ▲           └─► payment_failed ─┘
///            └─► paid ─► en_route ─► on_site ─► completed        (LAUNDRY above, CLEANING below)
///
/// draft, ready, picked_up, at_facility, quote_sent, awaiting_payment, payment_failed ──► canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placeholder written by the payment-setup saga before the card is saved.
    #[default]
    Draft,
    /// Payment method saved; the order is bookable work.
    Ready,
    PickedUp,
    AtFacility,
    QuoteSent,
    AwaitingPayment,
    PaymentFailed,
    PaidProcessing,
    OutForDelivery,
    /// Laundry returned to the customer (terminal).
    Delivered,
    Paid,
    EnRoute,
    OnSite,
    /// Cleaning visit finished (terminal).
    Completed,
    /// Cancelled before payment was committed (terminal).
    Canceled,
}

impl OrderStatus {
    /// Every status, in declaration order.
    pub const ALL: [OrderStatus; 15] = [
        OrderStatus::Draft,
        OrderStatus::Ready,
        OrderStatus::PickedUp,
        OrderStatus::AtFacility,
        OrderStatus::QuoteSent,
        OrderStatus::AwaitingPayment,
        OrderStatus::PaymentFailed,
        OrderStatus::PaidProcessing,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Paid,
        OrderStatus::EnRoute,
        OrderStatus::OnSite,
        OrderStatus::Completed,
        OrderStatus::Canceled,
    ];

    /// Returns true if no further transition is defined from this status.
    pub fn is_terminal(&self) -> bool {
        transitions::is_terminal(*self)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Ready => "ready",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::AtFacility => "at_facility",
            OrderStatus::QuoteSent => "quote_sent",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::PaidProcessing => "paid_processing",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Paid => "paid",
            OrderStatus::EnRoute => "en_route",
            OrderStatus::OnSite => "on_site",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "order status",
                value: s.to_string(),
            })
    }
}

/// A stored or submitted name that matches no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_draft() {
        assert_eq!(OrderStatus::default(), OrderStatus::Draft);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in OrderStatus::ALL {
            let parsed: OrderStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        let json = serde_json::to_string(&OrderStatus::AwaitingPayment).unwrap();
        assert_eq!(json, "\"awaiting_payment\"");
    }

    #[test]
    fn test_service_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ServiceType::Laundry).unwrap(),
            "\"LAUNDRY\""
        );
        assert_eq!("CLEANING".parse::<ServiceType>(), Ok(ServiceType::Cleaning));
        assert!("laundry".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::Draft.is_terminal());
        assert!(!OrderStatus::PaymentFailed.is_terminal());
    }
}

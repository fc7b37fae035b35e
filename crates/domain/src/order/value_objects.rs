//! Value objects carried by an order.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use super::OrderError;

/// A scheduled appointment window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, OrderError> {
        if end <= start {
            return Err(OrderError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Returns true if the window's end is after its start.
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

/// Delivery address as captured at booking time.
///
/// Later profile edits never rewrite this snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Address {
    /// Returns the name of the first required field that is blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("line1", &self.line1),
            ("city", &self.city),
            ("region", &self.region),
            ("postal_code", &self.postal_code),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// Contact details for a customer booking without an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Who an order belongs to: an account or a guest, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomerIdentity {
    User { user_id: UserId },
    Guest(GuestContact),
}

impl CustomerIdentity {
    /// Creates an authenticated identity.
    pub fn user(user_id: UserId) -> Self {
        CustomerIdentity::User { user_id }
    }

    /// Creates a guest identity.
    pub fn guest(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        CustomerIdentity::Guest(GuestContact {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
        })
    }

    /// Returns the user reference, if authenticated.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            CustomerIdentity::User { user_id } => Some(*user_id),
            CustomerIdentity::Guest(_) => None,
        }
    }

    /// Returns the guest contact, if a guest.
    pub fn guest_contact(&self) -> Option<&GuestContact> {
        match self {
            CustomerIdentity::User { .. } => None,
            CustomerIdentity::Guest(contact) => Some(contact),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, CustomerIdentity::Guest(_))
    }

    /// Stable key used to map this identity to one gateway customer.
    ///
    /// Guest emails are case-folded so `A@x.com` and `a@x.com` share a customer.
    pub fn identity_key(&self) -> String {
        match self {
            CustomerIdentity::User { user_id } => format!("user:{user_id}"),
            CustomerIdentity::Guest(contact) => {
                format!("guest:{}", contact.email.trim().to_lowercase())
            }
        }
    }
}

/// References to payment-gateway objects attached to an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefs {
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub setup_intent_id: Option<String>,
}

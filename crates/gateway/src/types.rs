//! Gateway objects the booking core reads and creates.
//!
//! Only the fields the saga consumes are modelled.

use std::collections::BTreeMap;

use domain::Money;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCustomer {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    /// Customer the method is attached to, if any.
    pub customer_id: Option<String>,
    pub card_brand: Option<String>,
    pub last4: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
}

impl SetupIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupIntentStatus::RequiresPaymentMethod => "requires_payment_method",
            SetupIntentStatus::RequiresConfirmation => "requires_confirmation",
            SetupIntentStatus::RequiresAction => "requires_action",
            SetupIntentStatus::Processing => "processing",
            SetupIntentStatus::Succeeded => "succeeded",
            SetupIntentStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for SetupIntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub status: SetupIntentStatus,
    /// Secret the client needs to finish a pending customer action.
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSetupIntent {
    pub customer_id: String,
    pub payment_method_id: String,
    /// Confirm in the same call.
    pub confirm: bool,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCharge {
    pub amount: Money,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub description: Option<String>,
    /// Charges sharing a key are created at most once.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub charge_id: String,
    pub amount: Money,
}

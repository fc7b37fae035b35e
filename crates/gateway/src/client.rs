use async_trait::async_trait;
use domain::Money;

use crate::Result;
use crate::types::{
    Charge, CreateCharge, CreateCustomer, CreateSetupIntent, Customer, PaymentMethod, Refund,
    SetupIntent,
};

/// Operations the booking core performs against the payment gateway.
///
/// Implementations must be thread-safe; one instance serves every request.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, request: CreateCustomer) -> Result<Customer>;

    async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod>;

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod>;

    /// Creates a setup intent, confirming it in the same call when
    /// `request.confirm` is set.
    async fn create_setup_intent(&self, request: CreateSetupIntent) -> Result<SetupIntent>;

    async fn confirm_setup_intent(&self, setup_intent_id: &str) -> Result<SetupIntent>;

    async fn create_charge(&self, request: CreateCharge) -> Result<Charge>;

    /// Refunds `amount`, or the whole charge when `None`.
    async fn create_refund(&self, charge_id: &str, amount: Option<Money>) -> Result<Refund>;
}

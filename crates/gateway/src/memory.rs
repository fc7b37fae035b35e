//! In-memory payment gateway for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use domain::Money;

use crate::client::PaymentGateway;
use crate::error::{GatewayError, Result};
use crate::types::{
    Charge, ChargeStatus, CreateCharge, CreateCustomer, CreateSetupIntent, Customer,
    PaymentMethod, Refund, SetupIntent, SetupIntentStatus,
};

/// Gateway operations, used to target failure injection and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    CreateCustomer,
    RetrievePaymentMethod,
    AttachPaymentMethod,
    DetachPaymentMethod,
    CreateSetupIntent,
    ConfirmSetupIntent,
    CreateCharge,
    CreateRefund,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    customers: HashMap<String, Customer>,
    payment_methods: HashMap<String, PaymentMethod>,
    setup_intents: HashMap<String, SetupIntent>,
    charges: HashMap<String, Charge>,
    charges_by_key: HashMap<String, String>,
    refunds: Vec<Refund>,
    next_id: u32,
    calls: HashMap<GatewayOperation, u32>,
    queued_failures: HashMap<GatewayOperation, VecDeque<GatewayError>>,
    persistent_failures: HashMap<GatewayOperation, GatewayError>,
    setup_intent_outcome: Option<SetupIntentStatus>,
}

impl InMemoryGatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:04}", self.next_id)
    }

    /// Counts the call and returns an injected failure, if any.
    fn enter(&mut self, op: GatewayOperation) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(err) = self.queued_failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = self.persistent_failures.get(&op) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn payment_method(&mut self, id: &str) -> Result<&mut PaymentMethod> {
        // Tokens minted client-side are unknown until first seen.
        if !self.payment_methods.contains_key(id) {
            if !id.starts_with("pm_") {
                return Err(GatewayError::resource_missing("payment_method", id));
            }
            self.payment_methods.insert(
                id.to_string(),
                PaymentMethod {
                    id: id.to_string(),
                    customer_id: None,
                    card_brand: Some("visa".into()),
                    last4: Some("4242".into()),
                },
            );
        }
        self.payment_methods
            .get_mut(id)
            .ok_or_else(|| GatewayError::resource_missing("payment_method", id))
    }

    fn confirmed_status(&self) -> SetupIntentStatus {
        self.setup_intent_outcome
            .unwrap_or(SetupIntentStatus::Succeeded)
    }
}

/// In-memory payment gateway for testing.
///
/// Behaves like a healthy gateway by default. Failures are injected per
/// operation, either once (`fail_next`) or until cleared (`set_failure`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fails the next call to `op` with `error`.
    pub fn fail_next(&self, op: GatewayOperation, error: GatewayError) {
        self.lock()
            .queued_failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fails every call to `op` until cleared with `None`.
    pub fn set_failure(&self, op: GatewayOperation, error: Option<GatewayError>) {
        let mut state = self.lock();
        match error {
            Some(error) => state.persistent_failures.insert(op, error),
            None => state.persistent_failures.remove(&op),
        };
    }

    /// Status that confirmed setup intents end in. Defaults to succeeded.
    pub fn set_setup_intent_outcome(&self, status: SetupIntentStatus) {
        self.lock().setup_intent_outcome = Some(status);
    }

    /// Registers a payment method, optionally already attached.
    pub fn register_payment_method(&self, id: &str, customer_id: Option<&str>) {
        self.lock().payment_methods.insert(
            id.to_string(),
            PaymentMethod {
                id: id.to_string(),
                customer_id: customer_id.map(str::to_string),
                card_brand: Some("visa".into()),
                last4: Some("4242".into()),
            },
        );
    }

    pub fn call_count(&self, op: GatewayOperation) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn customer(&self, id: &str) -> Option<Customer> {
        self.lock().customers.get(id).cloned()
    }

    pub fn customer_count(&self) -> usize {
        self.lock().customers.len()
    }

    pub fn payment_method(&self, id: &str) -> Option<PaymentMethod> {
        self.lock().payment_methods.get(id).cloned()
    }

    pub fn charges(&self) -> Vec<Charge> {
        self.lock().charges.values().cloned().collect()
    }

    pub fn refunds(&self) -> Vec<Refund> {
        self.lock().refunds.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_customer(&self, request: CreateCustomer) -> Result<Customer> {
        let mut state = self.lock();
        state.enter(GatewayOperation::CreateCustomer)?;

        let customer = Customer {
            id: state.next_id("cus"),
            email: request.email,
            name: request.name,
            metadata: request.metadata,
        };
        state.customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod> {
        let mut state = self.lock();
        state.enter(GatewayOperation::RetrievePaymentMethod)?;
        Ok(state.payment_method(payment_method_id)?.clone())
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod> {
        let mut state = self.lock();
        state.enter(GatewayOperation::AttachPaymentMethod)?;

        if !state.customers.contains_key(customer_id) {
            return Err(GatewayError::resource_missing("customer", customer_id));
        }
        let method = state.payment_method(payment_method_id)?;
        if method
            .customer_id
            .as_deref()
            .is_some_and(|current| current != customer_id)
        {
            return Err(GatewayError::invalid_request(
                "payment_method_already_attached",
                format!("payment method {payment_method_id} is attached to another customer"),
            ));
        }
        method.customer_id = Some(customer_id.to_string());
        Ok(method.clone())
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod> {
        let mut state = self.lock();
        state.enter(GatewayOperation::DetachPaymentMethod)?;

        let method = state.payment_method(payment_method_id)?;
        method.customer_id = None;
        Ok(method.clone())
    }

    async fn create_setup_intent(&self, request: CreateSetupIntent) -> Result<SetupIntent> {
        let mut state = self.lock();
        state.enter(GatewayOperation::CreateSetupIntent)?;

        if !state.customers.contains_key(&request.customer_id) {
            return Err(GatewayError::resource_missing("customer", &request.customer_id));
        }
        state.payment_method(&request.payment_method_id)?;

        let id = state.next_id("seti");
        let status = if request.confirm {
            state.confirmed_status()
        } else {
            SetupIntentStatus::RequiresConfirmation
        };
        let intent = SetupIntent {
            client_secret: Some(format!("{id}_secret")),
            id: id.clone(),
            customer_id: request.customer_id,
            payment_method_id: request.payment_method_id,
            status,
        };
        state.setup_intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn confirm_setup_intent(&self, setup_intent_id: &str) -> Result<SetupIntent> {
        let mut state = self.lock();
        state.enter(GatewayOperation::ConfirmSetupIntent)?;

        let status = state.confirmed_status();
        let intent = state
            .setup_intents
            .get_mut(setup_intent_id)
            .ok_or_else(|| GatewayError::resource_missing("setup_intent", setup_intent_id))?;
        if intent.status == SetupIntentStatus::RequiresConfirmation {
            intent.status = status;
        }
        Ok(intent.clone())
    }

    async fn create_charge(&self, request: CreateCharge) -> Result<Charge> {
        let mut state = self.lock();
        state.enter(GatewayOperation::CreateCharge)?;

        if let Some(key) = &request.idempotency_key
            && let Some(existing) = state
                .charges_by_key
                .get(key)
                .and_then(|id| state.charges.get(id))
        {
            return Ok(existing.clone());
        }

        let method = state.payment_method(&request.payment_method_id)?;
        if method.customer_id.as_deref() != Some(request.customer_id.as_str()) {
            return Err(GatewayError::invalid_request(
                "payment_method_not_attached",
                "payment method does not belong to this customer",
            ));
        }

        let charge = Charge {
            id: state.next_id("ch"),
            amount: request.amount,
            currency: request.currency,
            customer_id: request.customer_id,
            payment_method_id: request.payment_method_id,
            status: ChargeStatus::Succeeded,
        };
        if let Some(key) = request.idempotency_key {
            state.charges_by_key.insert(key, charge.id.clone());
        }
        state.charges.insert(charge.id.clone(), charge.clone());
        Ok(charge)
    }

    async fn create_refund(&self, charge_id: &str, amount: Option<Money>) -> Result<Refund> {
        let mut state = self.lock();
        state.enter(GatewayOperation::CreateRefund)?;

        let charged = state
            .charges
            .get(charge_id)
            .map(|charge| charge.amount)
            .ok_or_else(|| GatewayError::resource_missing("charge", charge_id))?;
        let refund = Refund {
            id: state.next_id("re"),
            charge_id: charge_id.to_string(),
            amount: amount.unwrap_or(charged),
        };
        state.refunds.push(refund.clone());
        Ok(refund)
    }
}

//! A gateway decorator that routes every call through the shared quota and
//! circuit breakers.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use domain::Money;
use resilience::{CircuitBreaker, CircuitError, ResilienceRegistry};

use crate::classifier::classify;
use crate::client::PaymentGateway;
use crate::error::{GatewayError, Result};
use crate::types::{
    Charge, CreateCharge, CreateCustomer, CreateSetupIntent, Customer, PaymentMethod, Refund,
    SetupIntent,
};

/// Wraps a [`PaymentGateway`] with rate limiting and circuit breaking.
///
/// Confirmation calls use the payment-confirmation breaker, everything else
/// the general one. Only service failures count against a breaker; card
/// declines pass through untouched.
#[derive(Clone)]
pub struct GuardedGateway {
    inner: Arc<dyn PaymentGateway>,
    registry: ResilienceRegistry,
}

impl GuardedGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, registry: ResilienceRegistry) -> Self {
        Self { inner, registry }
    }

    pub fn registry(&self) -> &ResilienceRegistry {
        &self.registry
    }

    /// Runs `f` behind the quota and `breaker`, recording
    /// `gateway_requests_total{operation, outcome}` and the call duration.
    async fn guarded<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        operation: &'static str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = self
            .registry
            .quota()
            .execute_with_quota(|| breaker.execute_filtered(f, GatewayError::is_service_failure))
            .await;
        metrics::histogram!("gateway_request_duration_seconds", "operation" => operation)
            .record(start.elapsed().as_secs_f64());

        let (outcome, result) = match result {
            Ok(value) => ("ok", Ok(value)),
            Err(CircuitError::Open {
                breaker,
                retry_after,
            }) => {
                tracing::warn!(operation, %breaker, ?retry_after, "gateway call rejected");
                ("circuit_open", Err(GatewayError::circuit_open(&breaker)))
            }
            Err(CircuitError::Inner(err)) => (classify(&err).category.code(), Err(err)),
        };
        metrics::counter!("gateway_requests_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        result
    }

    fn general(&self) -> &CircuitBreaker {
        self.registry.general_breaker()
    }

    fn confirmation(&self) -> &CircuitBreaker {
        self.registry.payment_confirmation_breaker()
    }
}

impl std::fmt::Debug for GuardedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedGateway")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaymentGateway for GuardedGateway {
    async fn create_customer(&self, request: CreateCustomer) -> Result<Customer> {
        self.guarded(self.general(), "create_customer", || {
            self.inner.create_customer(request)
        })
        .await
    }

    async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod> {
        self.guarded(self.general(), "retrieve_payment_method", || {
            self.inner.retrieve_payment_method(payment_method_id)
        })
        .await
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod> {
        self.guarded(self.general(), "attach_payment_method", || {
            self.inner.attach_payment_method(payment_method_id, customer_id)
        })
        .await
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod> {
        self.guarded(self.general(), "detach_payment_method", || {
            self.inner.detach_payment_method(payment_method_id)
        })
        .await
    }

    async fn create_setup_intent(&self, request: CreateSetupIntent) -> Result<SetupIntent> {
        let breaker = if request.confirm {
            self.confirmation()
        } else {
            self.general()
        };
        self.guarded(breaker, "create_setup_intent", || {
            self.inner.create_setup_intent(request)
        })
        .await
    }

    async fn confirm_setup_intent(&self, setup_intent_id: &str) -> Result<SetupIntent> {
        self.guarded(self.confirmation(), "confirm_setup_intent", || {
            self.inner.confirm_setup_intent(setup_intent_id)
        })
        .await
    }

    async fn create_charge(&self, request: CreateCharge) -> Result<Charge> {
        self.guarded(self.general(), "create_charge", || {
            self.inner.create_charge(request)
        })
        .await
    }

    async fn create_refund(&self, charge_id: &str, amount: Option<Money>) -> Result<Refund> {
        self.guarded(self.general(), "create_refund", || {
            self.inner.create_refund(charge_id, amount)
        })
        .await
    }
}

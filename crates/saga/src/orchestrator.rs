//! The payment-setup saga.
//!
//! Runs draft order → save payment method → validate card → finalize order,
//! recording every completed step on the saga record and unwinding on
//! failure. There is no retry inside the saga; calling [`execute`] again
//! starts a new record and a new order.
//!
//! [`execute`]: PaymentSetupSaga::execute

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, SagaId};
use domain::{
    BookingParams, CustomerIdentity, Money, Order, OrderStatus, PAYMENT_SETUP, PaymentRefs,
    SagaRecord, SagaStepKind,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use gateway::{
    ChargeStatus, CreateCharge, CreateCustomer, CreateSetupIntent, GatewayError,
    GatewayErrorKind, PaymentGateway, SetupIntentStatus,
};
use resilience::{TraceContext, trace_operation};
use serde_json::json;
use store::{BookingStore, PaymentCustomer};

use crate::compensation::CompensationStack;
use crate::error::{Result, SagaError};

/// Settings for the card validation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Charged then refunded to prove a card works. Zero disables validation.
    pub validation_amount: Money,
    pub currency: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            validation_amount: Money::from_cents(100),
            currency: "usd".to_string(),
        }
    }
}

/// Per-call switches decided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run the validation charge when everything else allows it.
    pub validate_card: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            validate_card: true,
        }
    }
}

/// Result of a committed saga.
#[derive(Debug, Clone)]
pub struct SagaOutcome {
    pub saga_id: SagaId,
    /// The order, in `ready`.
    pub order: Order,
    /// The customer still has to complete a challenge for the setup intent.
    pub requires_action: bool,
    /// Secret the client uses to finish that challenge.
    pub client_secret: Option<String>,
}

/// Gateway objects produced by the save-payment-method step.
#[derive(Debug, Clone)]
struct SavedMethod {
    customer_id: String,
    payment_method_id: String,
    setup_intent_id: String,
    requires_action: bool,
    client_secret: Option<String>,
}

struct SagaRun {
    record: SagaRecord,
    stack: CompensationStack,
}

/// Orchestrates payment setup for a new booking.
#[derive(Clone)]
pub struct PaymentSetupSaga {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: SagaConfig,
}

impl PaymentSetupSaga {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Runs the saga under a new trace.
    pub async fn execute(
        &self,
        params: BookingParams,
        options: ExecuteOptions,
    ) -> Result<SagaOutcome> {
        let trace = TraceContext::root();
        self.execute_traced(params, options, &trace).await
    }

    /// Runs the saga as part of an existing trace.
    ///
    /// Validation failures return before anything is written. Any later
    /// failure unwinds the completed steps, marks the record failed and
    /// returns the original error.
    ///
    /// Record writes are conditional on the record being unchanged since
    /// this run last wrote it. If the reconciler resolved it in between, the
    /// saga stops without unwinding and returns [`SagaError::Superseded`].
    #[tracing::instrument(
        skip_all,
        fields(
            trace_id = %trace.trace_id,
            service_type = params.service_type.as_str(),
            guest = params.identity.is_guest(),
        )
    )]
    pub async fn execute_traced(
        &self,
        params: BookingParams,
        options: ExecuteOptions,
        trace: &TraceContext,
    ) -> Result<SagaOutcome> {
        params.validate()?;

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        // Nothing external has happened yet, so a failure here needs no unwinding.
        let mut run = trace_operation("saga.initialize", &trace.child(), || {
            self.initialize(&params)
        })
        .await?;
        let saga_id = run.record.id;

        let result = self.run_steps(&params, options, &mut run, trace).await;
        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);

        match result {
            Ok(outcome) => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(
                    %saga_id,
                    order_id = %outcome.order.id(),
                    requires_action = outcome.requires_action,
                    duration,
                    "saga completed successfully"
                );
                Ok(outcome)
            }
            Err(err @ SagaError::Superseded(_)) => {
                metrics::counter!("saga_superseded_total").increment(1);
                tracing::warn!(%saga_id, duration, "saga record resolved elsewhere, not unwinding");
                Err(err)
            }
            Err(err) => {
                let err = self.compensate(&mut run, err).await;
                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(%saga_id, error = %err, duration, "saga failed");
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        params: &BookingParams,
        options: ExecuteOptions,
        run: &mut SagaRun,
        trace: &TraceContext,
    ) -> Result<SagaOutcome> {
        let order = trace_operation("saga.create_order", &trace.child(), || {
            self.create_order(params, run)
        })
        .await?;

        let saved = trace_operation("saga.save_payment_method", &trace.child(), || {
            self.save_payment_method(params, run)
        })
        .await?;

        let card_validated = if self.should_validate(params, options, &saved) {
            trace_operation("saga.validate_card", &trace.child(), || {
                self.validate_card(&saved, run)
            })
            .await?
        } else {
            false
        };

        let order = trace_operation("saga.finalize_order", &trace.child(), || {
            self.finalize_order(order, &saved, card_validated, run)
        })
        .await?;

        trace_operation("saga.complete", &trace.child(), || self.complete(run)).await?;

        Ok(SagaOutcome {
            saga_id: run.record.id,
            order,
            requires_action: saved.requires_action,
            client_secret: saved.client_secret,
        })
    }

    async fn initialize(&self, params: &BookingParams) -> Result<SagaRun> {
        let now = Utc::now();
        let input = serde_json::to_value(params)?;
        let mut record = SagaRecord::new(SagaId::new(), PAYMENT_SETUP, input, now);
        record.record_step(SagaStepKind::Initialize, json!({}), now)?;
        self.store.insert_saga(&record).await?;

        let mut stack = CompensationStack::new();
        stack.push_noop(SagaStepKind::Initialize);

        tracing::info!(saga_id = %record.id, "saga initialized");
        Ok(SagaRun { record, stack })
    }

    /// Appends a step to the record and persists it.
    async fn record_step(
        &self,
        run: &mut SagaRun,
        kind: SagaStepKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        let mut next = run.record.clone();
        next.record_step(kind, payload, Utc::now())?;
        self.persist(run, next).await?;
        tracing::info!(saga_id = %run.record.id, step = kind.as_str(), "saga step recorded");
        Ok(())
    }

    /// Writes `next` over the record this run last wrote.
    async fn persist(&self, run: &mut SagaRun, next: SagaRecord) -> Result<()> {
        let seen = run.record.updated_at;
        if !self.store.update_pending_saga(&next, seen).await? {
            return Err(SagaError::Superseded(next.id));
        }
        run.record = next;
        Ok(())
    }

    async fn create_order(&self, params: &BookingParams, run: &mut SagaRun) -> Result<Order> {
        let order = Order::draft(OrderId::new(), params, Utc::now());
        self.store.insert_order(&order).await?;

        let order_id = order.id();
        run.stack
            .push(SagaStepKind::CreateOrder, self.delete_order_action(order_id));
        run.record.order_id = Some(order_id);

        self.record_step(run, SagaStepKind::CreateOrder, json!({ "order_id": order_id }))
            .await?;
        Ok(order)
    }

    async fn save_payment_method(
        &self,
        params: &BookingParams,
        run: &mut SagaRun,
    ) -> Result<SavedMethod> {
        let customer_id = self.resolve_customer(&params.identity).await?;
        let payment_method_id = params.payment_method_id.trim().to_string();

        let method = self
            .gateway
            .retrieve_payment_method(&payment_method_id)
            .await?;
        match method.customer_id.as_deref() {
            Some(current) if current == customer_id => {
                tracing::debug!(%payment_method_id, "payment method already attached");
            }
            Some(previous) => {
                tracing::warn!(
                    %payment_method_id,
                    previous_customer = previous,
                    %customer_id,
                    "payment method attached to another customer, re-attaching"
                );
                self.gateway.detach_payment_method(&payment_method_id).await?;
                self.gateway
                    .attach_payment_method(&payment_method_id, &customer_id)
                    .await?;
            }
            None => {
                self.gateway
                    .attach_payment_method(&payment_method_id, &customer_id)
                    .await?;
            }
        }

        let mut metadata = BTreeMap::from([("saga_id".to_string(), run.record.id.to_string())]);
        if let Some(order_id) = run.record.order_id {
            metadata.insert("order_id".to_string(), order_id.to_string());
        }
        let mut intent = self
            .gateway
            .create_setup_intent(CreateSetupIntent {
                customer_id: customer_id.clone(),
                payment_method_id: payment_method_id.clone(),
                confirm: true,
                metadata,
            })
            .await?;
        if intent.status == SetupIntentStatus::RequiresConfirmation {
            intent = self.gateway.confirm_setup_intent(&intent.id).await?;
        }

        let requires_action = match intent.status {
            SetupIntentStatus::Succeeded | SetupIntentStatus::Processing => false,
            SetupIntentStatus::RequiresAction | SetupIntentStatus::RequiresConfirmation => true,
            SetupIntentStatus::RequiresPaymentMethod | SetupIntentStatus::Canceled => {
                return Err(GatewayError::new(
                    GatewayErrorKind::Card,
                    format!("setup intent {} ended {}", intent.id, intent.status),
                )
                .with_code("card_declined")
                .into());
            }
        };

        let saved = SavedMethod {
            customer_id,
            payment_method_id,
            setup_intent_id: intent.id.clone(),
            requires_action,
            client_secret: if requires_action {
                intent.client_secret.clone()
            } else {
                None
            },
        };

        // The saved method is left on the customer; it costs nothing unused.
        let setup_intent_id = saved.setup_intent_id.clone();
        run.stack.push(SagaStepKind::SavePaymentMethod, move || {
            let setup_intent_id = setup_intent_id.clone();
            async move {
                tracing::info!(%setup_intent_id, "payment method left attached");
                Ok(())
            }
            .boxed()
        });

        self.record_step(
            run,
            SagaStepKind::SavePaymentMethod,
            json!({
                "customer_id": saved.customer_id,
                "payment_method_id": saved.payment_method_id,
                "setup_intent_id": saved.setup_intent_id,
                "status": intent.status.as_str(),
                "requires_action": requires_action,
            }),
        )
        .await?;
        Ok(saved)
    }

    /// Finds the gateway customer for `identity`, creating it on first use.
    ///
    /// Two sagas may both create a customer; the first mapping written wins
    /// and the loser reuses it.
    #[tracing::instrument(skip_all, fields(guest = identity.is_guest()))]
    async fn resolve_customer(&self, identity: &CustomerIdentity) -> Result<String> {
        let identity_key = identity.identity_key();
        if let Some(existing) = self.store.find_payment_customer(&identity_key).await? {
            return Ok(existing.customer_id);
        }

        let mut metadata = BTreeMap::from([
            ("identity_key".to_string(), identity_key.clone()),
            ("guest".to_string(), identity.is_guest().to_string()),
        ]);
        let request = match identity {
            CustomerIdentity::User { user_id } => {
                metadata.insert("user_id".to_string(), user_id.to_string());
                CreateCustomer {
                    metadata,
                    ..Default::default()
                }
            }
            CustomerIdentity::Guest(contact) => CreateCustomer {
                email: Some(contact.email.trim().to_lowercase()),
                name: Some(contact.name.trim().to_string()),
                phone: Some(contact.phone.clone()),
                metadata,
            },
        };
        let created = self.gateway.create_customer(request).await?;

        let stored = self
            .store
            .insert_payment_customer(PaymentCustomer {
                identity_key,
                customer_id: created.id.clone(),
                is_guest: identity.is_guest(),
                created_at: Utc::now(),
            })
            .await?;
        if stored.customer_id != created.id {
            metrics::counter!("payment_customer_race_lost_total").increment(1);
            tracing::info!(
                winner = %stored.customer_id,
                duplicate = %created.id,
                "customer mapping already written, reusing it"
            );
        }
        Ok(stored.customer_id)
    }

    fn should_validate(
        &self,
        params: &BookingParams,
        options: ExecuteOptions,
        saved: &SavedMethod,
    ) -> bool {
        let skip_reason = if params.identity.is_guest() {
            Some("guest identity")
        } else if !self.config.validation_amount.is_positive() {
            Some("validation amount is zero")
        } else if !options.validate_card {
            Some("disabled for this call")
        } else if saved.requires_action {
            Some("customer action pending")
        } else {
            None
        };

        match skip_reason {
            Some(reason) => {
                tracing::info!(reason, "skipping card validation");
                false
            }
            None => true,
        }
    }

    /// Charges the validation amount and refunds it in full.
    async fn validate_card(&self, saved: &SavedMethod, run: &mut SagaRun) -> Result<bool> {
        let charge = self
            .gateway
            .create_charge(CreateCharge {
                amount: self.config.validation_amount,
                currency: self.config.currency.clone(),
                customer_id: saved.customer_id.clone(),
                payment_method_id: saved.payment_method_id.clone(),
                description: Some("Card validation".to_string()),
                idempotency_key: Some(format!("{}-card-validation", run.record.id)),
            })
            .await?;

        let refund = match self.gateway.create_refund(&charge.id, None).await {
            Ok(refund) => refund,
            Err(err) => {
                metrics::counter!("card_validation_refund_failed_total").increment(1);
                tracing::error!(
                    charge_id = %charge.id,
                    error = %err,
                    "validation charge was not refunded"
                );
                return Err(err.into());
            }
        };

        let validated = charge.status == ChargeStatus::Succeeded;
        run.stack.push_noop(SagaStepKind::ValidateCard);
        self.record_step(
            run,
            SagaStepKind::ValidateCard,
            json!({
                "charge_id": charge.id,
                "refund_id": refund.id,
                "amount": charge.amount,
                "validated": validated,
            }),
        )
        .await?;
        Ok(validated)
    }

    async fn finalize_order(
        &self,
        mut order: Order,
        saved: &SavedMethod,
        card_validated: bool,
        run: &mut SagaRun,
    ) -> Result<Order> {
        let customer_id = self
            .store
            .find_payment_customer(&order.identity().identity_key())
            .await?
            .map(|mapping| mapping.customer_id)
            .unwrap_or_else(|| saved.customer_id.clone());

        order.attach_payment(
            PaymentRefs {
                customer_id: Some(customer_id),
                payment_method_id: Some(saved.payment_method_id.clone()),
                setup_intent_id: Some(saved.setup_intent_id.clone()),
            },
            card_validated,
        )?;
        order.transition_to(OrderStatus::Ready, Utc::now())?;
        let stored = self.store.update_order(&order).await?;

        run.stack
            .push(SagaStepKind::FinalizeOrder, self.delete_order_action(stored.id()));
        self.record_step(
            run,
            SagaStepKind::FinalizeOrder,
            json!({
                "order_id": stored.id(),
                "status": stored.status(),
                "card_validated": card_validated,
            }),
        )
        .await?;
        Ok(stored)
    }

    async fn complete(&self, run: &mut SagaRun) -> Result<()> {
        let mut completed = run.record.clone();
        completed.complete(Utc::now())?;
        self.persist(run, completed).await
    }

    /// Hard-deletes the order. Deleting a missing order is not an error, so
    /// the action can run any number of times.
    fn delete_order_action(
        &self,
        order_id: OrderId,
    ) -> impl Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
        let store = Arc::clone(&self.store);
        move || {
            let store = Arc::clone(&store);
            async move {
                if !store.delete_order(order_id).await? {
                    tracing::debug!(%order_id, "order already deleted");
                }
                Ok::<_, SagaError>(())
            }
            .boxed()
        }
    }

    /// Unwinds completed steps and marks the record failed.
    ///
    /// Returns the error to report: `err` itself when the record was marked
    /// failed, `Superseded` when the reconciler got there first, and
    /// `Unresolved` when the record could not be written at all.
    async fn compensate(&self, run: &mut SagaRun, err: SagaError) -> SagaError {
        let saga_id = run.record.id;
        tracing::warn!(
            %saga_id,
            error = %err,
            steps = ?run.stack.steps(),
            "saga step failed, compensating"
        );

        let report = run.stack.unwind().await;
        if !report.failed.is_empty() {
            tracing::error!(%saga_id, failed = ?report.failed, "compensation incomplete");
        }

        let mut failed = run.record.clone();
        if let Err(record_err) = failed.fail(err.to_string(), Utc::now()) {
            tracing::error!(%saga_id, error = %record_err, "saga record already final");
            return err;
        }
        match self.persist(run, failed).await {
            Ok(()) => err,
            Err(superseded @ SagaError::Superseded(_)) => {
                tracing::warn!(
                    %saga_id,
                    error = %err,
                    "saga record resolved elsewhere during unwind"
                );
                superseded
            }
            Err(store_err) => {
                tracing::error!(%saga_id, error = %store_err, "failed to mark saga failed");
                SagaError::Unresolved {
                    saga_id,
                    source: Box::new(err),
                }
            }
        }
    }
}

impl std::fmt::Debug for PaymentSetupSaga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSetupSaga")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

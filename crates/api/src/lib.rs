//! HTTP API for the laundry booking core.
//!
//! Provides REST endpoints for bookings, order status, saga records and
//! slot capacity, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use capacity::SlotLedger;
use domain::RolloutPolicy;
use gateway::{GuardedGateway, InMemoryPaymentGateway, PaymentGateway};
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::ResilienceRegistry;
use saga::{BookingService, LogNotifier, Notifier, PaymentSetupSaga, SagaReconciler};
use store::{BookingStore, InMemoryBookingStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub bookings: BookingService,
    pub reconciler: SagaReconciler,
    /// Decides which authenticated users get the validation charge.
    pub rollout: RolloutPolicy,
}

impl AppState {
    /// Wires the booking service over the given store, gateway and notifier.
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        let saga = PaymentSetupSaga::new(Arc::clone(&store), gateway, config.saga_config());
        let ledger = SlotLedger::new(Arc::clone(&store));
        let reconciler = SagaReconciler::new(Arc::clone(&store), config.stale_after())
            .with_ledger(ledger.clone());

        Self {
            bookings: BookingService::new(store, ledger, saga, notifier),
            reconciler,
            rollout: config.rollout_policy(),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/bookings", post(routes::bookings::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/next-statuses", get(routes::orders::next_statuses))
        .route("/orders/{id}/status", post(routes::orders::change_status))
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/slots", get(routes::slots::list))
        .route("/slots/generate", post(routes::slots::generate))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates state backed by in-memory doubles, the gateway behind the
/// standard resilience guards.
pub fn create_default_state(config: &Config) -> Arc<AppState> {
    let store: Arc<dyn BookingStore> = Arc::new(InMemoryBookingStore::new());
    let gateway = GuardedGateway::new(
        Arc::new(InMemoryPaymentGateway::new()),
        ResilienceRegistry::new(config.gateway_quota_per_second),
    );
    Arc::new(AppState::new(
        store,
        Arc::new(gateway),
        Arc::new(LogNotifier),
        config,
    ))
}

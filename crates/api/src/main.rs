//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::AppState;
use gateway::{GuardedGateway, InMemoryPaymentGateway};
use resilience::ResilienceRegistry;
use saga::{LogNotifier, SagaReconciler};
use sqlx::postgres::PgPoolOptions;
use store::{BookingStore, InMemoryBookingStore, PostgresBookingStore};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(config: &Config) -> Arc<dyn BookingStore> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        return Arc::new(InMemoryBookingStore::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to Postgres");
    let store = PostgresBookingStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to Postgres");
    Arc::new(store)
}

/// Sweeps stale saga records on a fixed interval until aborted.
fn spawn_reconciler(reconciler: SagaReconciler, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = reconciler.reconcile_once(chrono::Utc::now()).await {
                tracing::error!(error = %err, "reconciliation sweep failed");
            }
        }
    })
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Store, gateway and application state
    let store = open_store(&config).await;
    tracing::warn!("no payment processor configured, using the in-memory gateway");
    let gateway = GuardedGateway::new(
        Arc::new(InMemoryPaymentGateway::new()),
        ResilienceRegistry::new(config.gateway_quota_per_second),
    );
    let state = Arc::new(AppState::new(
        store,
        Arc::new(gateway),
        Arc::new(LogNotifier),
        &config,
    ));

    // 4. Background reconciliation
    let reconciler = spawn_reconciler(state.reconciler.clone(), config.reconcile_interval);

    // 5. Build the application and serve
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    reconciler.abort();
    tracing::info!("server shut down gracefully");
}

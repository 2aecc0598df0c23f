//! VectorFlow Control Plane
//!
//! Main entry point: wires the store, driver, reconciler, broker, and hub
//! together and serves the control API.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vectorflow_control::{
    alert_ingest::{AlertRepository, AlertService},
    frame_broker::{FrameActivity, FrameBroker},
    metrics::init_metrics,
    reconciler::Reconciler,
    runtime_driver,
    schema::ensure_schema,
    settings_manager::{SettingsManager, SettingsRepository},
    state::{AppConfig, AppState},
    stream_store::StreamStore,
    subscriber_hub::SubscriberHub,
    web_api,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vectorflow_control=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VectorFlow control plane v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        redis_url = %config.redis_url,
        runtime_driver = %config.runtime_driver,
        worker_image = %config.worker_image,
        "Configuration loaded"
    );

    init_metrics();

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    tracing::info!("Database connected");

    ensure_schema(&pool).await?;

    // Initialize components
    let streams = Arc::new(StreamStore::new(pool.clone()));
    let settings = Arc::new(SettingsManager::new(SettingsRepository::new(pool.clone())).await?);
    let alerts = Arc::new(AlertService::new(AlertRepository::new(pool.clone())));
    let hub = Arc::new(SubscriberHub::new());
    let frame_activity = Arc::new(FrameActivity::new());

    let driver = runtime_driver::from_config(&config).await?;
    tracing::info!(variant = %config.runtime_driver, "Runtime driver initialized");

    let reconciler = Arc::new(Reconciler::new(
        streams.clone(),
        driver.clone(),
        settings.clone(),
        frame_activity.clone(),
        config.clone(),
    ));

    // Create application state
    let state = AppState {
        pool,
        config: config.clone(),
        streams,
        settings: settings.clone(),
        alerts,
        driver,
        reconciler: reconciler.clone(),
        hub: hub.clone(),
        frame_activity: frame_activity.clone(),
    };

    // Root shutdown signal for the long-lived loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start reconciliation loop
    tokio::spawn(reconciler.clone().run(shutdown_rx.clone()));

    // Start frame broker
    let broker = FrameBroker::new(
        config.redis_url.clone(),
        config.frame_channel_pattern.clone(),
        hub.clone(),
        frame_activity,
        settings.subscribe(),
        config.broker_backoff_initial,
        config.broker_backoff_cap,
    );
    tokio::spawn(broker.run(shutdown_rx));

    // Create router
    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop loops and end every subscriber sequence
    let _ = shutdown_tx.send(true);
    hub.close_all();
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

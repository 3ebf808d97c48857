//! Ownerific API server
//!
//! Benefits and financial-wellness backend. Serves the feature routes under
//! `/v1` and runs each feature's background queues in the same process.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ownerific_api::api::{build_router, AppState};
use ownerific_api::features::all_features;
use ownerific_api::queue::{Broker, ErrorSink, QueueOptions};
use ownerific_api::registry::Registry;
use ownerific_api::workers::{WorkerContext, WorkerSet};
use ownerific_api::{db, Config};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ownerific_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.is_production());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting Ownerific API");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;

    let features = all_features();
    let registry = Registry::build(&features)?;
    tracing::info!(errors = registry.error_count(), "Error registry built");

    if !db::check_schema(&pool).await? {
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let broker = Broker::open(&config.redis_url)?;
    let sink = ErrorSink::new();
    let worker_ctx = WorkerContext {
        broker: broker.clone(),
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        sink: sink.clone(),
        options: QueueOptions::default(),
    };
    let mut workers = WorkerSet::register(&features, &worker_ctx).await?;
    tracing::info!(queues = workers.queues().len(), "Background queues running");

    let state = AppState::new(pool.clone(), registry, broker, config);
    let app = build_router(state, &features);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    workers.shutdown().await;

    let counts = sink.counts();
    tracing::info!(
        failed = counts.failed,
        stalled = counts.stalled,
        errors = counts.errors,
        "Queues closed"
    );

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nilam::api::AppState;
use nilam::config::Config;
use nilam::services::clock::SystemClock;
use nilam::services::lifecycle;
use nilam::{db, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nilam=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting nilam auction server...");

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let clock: Arc<dyn nilam::services::clock::Clock> = Arc::new(SystemClock);

    // Catch up on any transitions missed while the process was down.
    if let Err(e) = lifecycle::run_sweep(&pool, clock.as_ref()).await {
        tracing::error!(error = %e, "Initial lifecycle sweep failed");
    }

    let sweeper =
        jobs::status_sweeper::start(pool.clone(), clock.clone(), config.sweep_interval_secs)
            .await
            .map_err(|e| anyhow::anyhow!("failed to start lifecycle sweeper: {e}"))?;

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        clock,
    };

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(nilam::api::auctions::router())
        .merge(nilam::api::bids::router())
        .merge(nilam::api::notifications::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let mut sweeper = sweeper;
    sweeper.shutdown().await.ok();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}

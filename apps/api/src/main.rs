mod config;
mod db;
mod diagnosis;
mod errors;
mod models;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::diagnosis::store::PgDiagnosisStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Diagnosis API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgDiagnosisStore::new(db));

    let policy = config.diagnosis.retry_policy();
    info!(
        "Result polling: {} attempts, {}ms apart, {}ms max wait",
        policy.max_attempts,
        policy.interval.as_millis(),
        policy.total_wait().as_millis()
    );

    let state = AppState::new(store, &config.diagnosis);
    let sweep_every = config.diagnosis.sweep_interval();
    state.attempts.spawn_sweeper(sweep_every);
    info!(
        "Idle attempts expire after {}s, swept every {}s",
        config.diagnosis.attempt_ttl_secs,
        sweep_every.as_secs()
    );

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

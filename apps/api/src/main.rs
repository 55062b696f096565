mod config;
mod db;
mod errors;
mod models;
mod prediction;
mod routes;
mod state;
mod timing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::prediction::bus::InvalidationBus;
use crate::prediction::pg::{PgPredictionRepository, PgPrepSource};
use crate::prediction::store::PredictionStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; invalid weights or tunables abort before serving
    let config = Config::from_env()?;
    config.prediction.weights.validate()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Prediction API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    let store = Arc::new(PredictionStore::new(
        Arc::new(PgPrepSource::new(db.clone())),
        Arc::new(PgPredictionRepository::new(db)),
        config.prediction.clone(),
    ));
    info!(
        "Prediction store ready (cap {}, retry {}x)",
        store.config().recommendation_cap,
        store.config().retry.max_attempts
    );

    let bus = InvalidationBus::spawn(store.clone(), config.prediction.debounce);

    let state = AppState { store, bus };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()), // TODO: restrict origins once the web client's host is fixed
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

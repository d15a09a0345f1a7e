//! kioskhub - session lifecycle and presence coordinator

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kioskhub::{
    api::{self, AppState},
    config::Config,
    db,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kioskhub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting kioskhub...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Build application state
    let state = AppState::new(pool, &config);

    let seeded = state.credentials.seed(&config.seed).await?;
    if seeded > 0 {
        tracing::info!("Seeded {} identities", seeded);
    }

    // Periodic sweep of ephemeral and expired state
    {
        let state = state.clone();
        let period = config.session.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                sweep(&state).await;
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// One sweep pass; failures are logged and retried on the next tick
async fn sweep(state: &AppState) {
    let keys = state.rate_limiter.cleanup().await;

    let stale = match state.sessions.mark_stale().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Failed to mark stale sessions: {}", e);
            0
        }
    };

    let forced = state.force_actions.pending_count().await;

    let expired = match state.handoff.sweep_expired().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Failed to sweep pending sessions: {}", e);
            0
        }
    };

    tracing::debug!(
        "Sweep: {} limiter keys, {} stale sessions, {} queued force actions, {} expired pending sessions",
        keys,
        stale,
        forced,
        expired
    );
}

//! Playopia - login and registration service

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playopia::{
    api::{self, AppState, SessionCookie},
    config::Config,
    db::{
        self,
        repositories::{SqlxIdentityRepository, SqlxSessionRepository},
        DynDatabasePool,
    },
    services::{spawn_session_sweeper, AuthService, LoginRateLimiter, PasswordHasher},
    views::Views,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playopia=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Playopia...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let result = run(config, pool.clone()).await;

    pool.close().await;
    tracing::info!("Database pool closed");

    result
}

async fn run(config: Config, pool: DynDatabasePool) -> Result<()> {
    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize services
    let hasher = PasswordHasher::new(&config.password)?;
    let rate_limiter = Arc::new(LoginRateLimiter::new(&config.login_limit));
    let auth = Arc::new(
        AuthService::new(
            SqlxIdentityRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            hasher,
            chrono::Duration::minutes(config.session.ttl_minutes),
        )
        .with_rate_limiter(rate_limiter.clone()),
    );

    let state = AppState {
        auth: auth.clone(),
        views: Arc::new(Views::new()?),
        cookie: SessionCookie::from_config(&config.session),
    };

    let app = api::build_router(state, &config.server.static_dir);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    // Start session sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_session_sweeper(
        auth,
        rate_limiter,
        Duration::from_secs(config.session.sweep_interval_minutes * 60),
        shutdown_rx,
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!("Session sweeper ended abnormally: {}", e);
    }

    served.context("Server error")
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! customs-tracker server

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use customs_tracker::{
    api::{self, middleware::RequestStats, AppState},
    config::Config,
    db::{
        self,
        repositories::{
            SqlxFileRepository, SqlxObjectRepository, SqlxSessionRepository, SqlxUserRepository,
        },
    },
    services::{FileService, ObjectService, UserService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "customs_tracker=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting customs tracker...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {}", config.database.url);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Create repositories and services
    let file_service = Arc::new(FileService::new(
        SqlxFileRepository::boxed(pool.clone()),
        config.upload.clone(),
    ));
    let object_service = Arc::new(ObjectService::new(
        SqlxObjectRepository::boxed(pool.clone()),
        file_service,
    ));
    let user_service = Arc::new(UserService::with_session_expiration(
        SqlxUserRepository::boxed(pool.clone()),
        SqlxSessionRepository::boxed(pool.clone()),
        config.session.expiration_days,
    ));

    match user_service.user_count().await {
        Ok(0) => tracing::warn!(
            "No users yet; create one with `tracking-admin create-user <name>`"
        ),
        Ok(n) => tracing::info!("{} user(s) registered", n),
        Err(e) => tracing::warn!("Failed to count users: {}", e),
    }

    // Purge expired sessions every hour
    {
        let users = user_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                if let Err(e) = users.cleanup_expired_sessions().await {
                    tracing::warn!("Session cleanup failed: {}", e);
                }
            }
        });
    }

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        user_service,
        object_service,
        session_config: Arc::new(config.session.clone()),
        upload_config: Arc::new(config.upload.clone()),
        request_stats: Arc::new(RequestStats::new()),
    };

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

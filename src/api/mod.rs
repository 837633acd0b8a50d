//! API layer - HTTP handlers and routing
//!
//! - `POST /api/store`: the document store action endpoint
//! - `GET /api/health`: liveness and request statistics
//! - `/files/*`: uploaded blobs

pub mod middleware;
pub mod store;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub use middleware::{extract_session_token, ApiError, AppState, RequestStats};

/// Build the `/api` router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/store", post(store::handle_store))
        .route("/health", get(health))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/api", build_api_router())
        .nest_service("/files", ServeDir::new(&state.upload_config.path))
        .layer(DefaultBodyLimit::max(state.upload_config.max_body_size()))
        .layer(cors_layer(cors_origin))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

/// `*` or an unparsable origin allows any origin
fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            tracing::warn!("Invalid CORS origin {:?}: {}, allowing any", cors_origin, e);
            cors.allow_origin(Any)
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = state.pool.ping().await.is_ok();
    let stats = &state.request_stats;
    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
        "requests": stats.total_requests(),
        "avgResponseTimeUs": stats.avg_response_time_us(),
        "uptimeSeconds": stats.uptime_seconds(),
    }))
}

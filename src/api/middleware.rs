//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The error envelope (`{success: false, error, code}`)
//! - Session token extraction
//! - Request statistics

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{SessionConfig, UploadConfig};
use crate::services::backend::{codes, BackendError};
use crate::services::object::ObjectService;
use crate::services::user::{UserService, UserServiceError};

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Total response time in microseconds (for calculating average)
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: crate::db::DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub object_service: Arc<ObjectService>,
    pub session_config: Arc<SessionConfig>,
    pub upload_config: Arc<UploadConfig>,
    pub request_stats: Arc<RequestStats>,
}

/// Error envelope. Every failure is reported with HTTP 500 and a code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            code: code.into(),
        }
    }

    pub fn invalid_action(action: &str) -> Self {
        Self::new(codes::INVALID_ACTION, format!("Unknown action: {}", action))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(codes::UNAUTHORIZED, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_ERROR, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        if err.code() == codes::INTERNAL_ERROR {
            tracing::error!("Store action failed: {:?}", err);
        }
        Self::new(err.code(), err.to_string())
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => Self::unauthorized(msg),
            UserServiceError::ValidationError(msg) => Self::validation_error(msg),
            e @ UserServiceError::UserExists(_) => Self::validation_error(e.to_string()),
            e @ UserServiceError::UserNotFound(_) => Self::new(codes::NOT_FOUND, e.to_string()),
            UserServiceError::InternalError(e) => {
                tracing::error!("User service error: {:?}", e);
                Self::internal_error(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// Session token from an `Authorization: Bearer` header or a `session` cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix("session=") {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}

/// Request statistics middleware
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .request_stats
        .record(start.elapsed().as_micros() as u64);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_session_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn test_backend_errors_keep_their_code() {
        let err: ApiError = BackendError::object_not_found("Tracking", "x").into();
        assert_eq!(err.code, "OBJECT_NOT_FOUND");
        assert!(!err.success);

        let err: ApiError = UserServiceError::AuthenticationError("bad".into()).into();
        assert_eq!(err.code, "UNAUTHORIZED");
    }

    #[test]
    fn test_request_stats_average() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_us(), 0.0);
        stats.record(100);
        stats.record(300);
        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.avg_response_time_us(), 200.0);
    }
}

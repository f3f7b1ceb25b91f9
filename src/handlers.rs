use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::any::Any;
use std::backtrace::Backtrace;
use std::time::Instant;
use tracing::error;

use crate::error::GatekeeperError;
use crate::rate_limiter::RateLimiter;
use crate::response::{HealthResponse, ReadinessResponse, RouteErrorResponse};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            started_at: Instant::now(),
        }
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    Json(HealthResponse::ok(uptime, state.limiter.stats()))
}

/// Readiness check endpoint
pub async fn readiness_check() -> impl IntoResponse {
    Json(ReadinessResponse::ready())
}

/// Current limiter occupancy and limits
pub async fn limiter_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.limiter.stats())
}

pub async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(RouteErrorResponse::not_found(uri.path())),
    )
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(RouteErrorResponse::method_not_allowed(
            method.as_str(),
            uri.path(),
        )),
    )
}

/// Turns a panic inside a handler into a JSON 500.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = err.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = err.downcast_ref::<&str>() {
        msg.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(
        target: "gatekeeper::handlers",
        panic = %detail,
        backtrace = %Backtrace::force_capture(),
        "HTTP request panic recovered"
    );
    GatekeeperError::Internal(format!("panic: {}", detail)).into_response()
}

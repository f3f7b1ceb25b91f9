use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rate_limiter::LimiterStats;

/// Body of every error the gateway produces itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: &str, error: Option<String>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.to_string(),
            error,
        }
    }
}

/// Body for unmatched routes and methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteErrorResponse {
    pub error: String,
    pub status_code: u16,
    pub message: String,
    pub path: String,
}

impl RouteErrorResponse {
    pub fn not_found(path: &str) -> Self {
        Self {
            error: "Not Found".to_string(),
            status_code: StatusCode::NOT_FOUND.as_u16(),
            message: "The requested resource was not found".to_string(),
            path: path.to_string(),
        }
    }

    pub fn method_not_allowed(method: &str, path: &str) -> Self {
        Self {
            error: "Method Not Allowed".to_string(),
            status_code: StatusCode::METHOD_NOT_ALLOWED.as_u16(),
            message: format!("Method {} is not allowed for this resource", method),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub limiter: LimiterStats,
}

impl HealthResponse {
    pub fn ok(uptime_seconds: u64, limiter: LimiterStats) -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: unix_timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
            limiter,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: u64,
}

impl ReadinessResponse {
    pub fn ready() -> Self {
        Self {
            status: "ready".to_string(),
            timestamp: unix_timestamp(),
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

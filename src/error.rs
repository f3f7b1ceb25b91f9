use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::response::ErrorResponse;

pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Rejected limiter configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<(String, String)> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reason = errs
                    .first()
                    .map(|err| {
                        err.message
                            .as_ref()
                            .map(|msg| msg.to_string())
                            .unwrap_or_else(|| err.code.to_string())
                    })
                    .unwrap_or_else(|| "invalid".to_string());
                (field.to_string(), reason)
            })
            .collect();
        fields.sort();

        match fields.into_iter().next() {
            Some((field, reason)) => ConfigError::Invalid { field, reason },
            None => ConfigError::Invalid {
                field: "config".to_string(),
                reason: "invalid".to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum GatekeeperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatekeeperError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatekeeperError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatekeeperError::Config(_)
            | GatekeeperError::Io(_)
            | GatekeeperError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatekeeperError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GatekeeperError::RateLimitExceeded => {
                ErrorResponse::new(status, "Rate limit exceeded", None)
            }
            GatekeeperError::Internal(detail) => {
                ErrorResponse::new(status, "Internal server error", Some(detail.clone()))
            }
            other => ErrorResponse::new(status, "Internal server error", Some(other.to_string())),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatekeeperError::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatekeeperError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            field: "ip_burst".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for `ip_burst`: must be at least 1");

        let wrapped = GatekeeperError::from(err);
        assert!(wrapped.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_rate_limit_response_status() {
        let response = GatekeeperError::RateLimitExceeded.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}

//! Error types for the chart Lambda functions.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating, storing or serving charts.
#[derive(Error, Debug)]
pub enum Error {
    /// A required credential or service is not configured
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or missing request fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// The generation or storage service failed
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// The generation service answered with content we cannot use
    #[error("Generation error: {0}")]
    Generation(String),

    /// The caller has reached the chart limit for its tier
    #[error("Chart limit reached ({current}/{limit})")]
    QuotaExceeded { current: i64, limit: i64 },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Caller does not own the chart
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generated share id already exists
    #[error("Share id already in use: {0}")]
    ShareIdConflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::QuotaExceeded { .. } | Error::Unauthorized(_) => 403,
            Error::NotFound(_) => 404,
            Error::Upstream { status, .. } if (400..600).contains(status) => *status,
            Error::Upstream { .. } => 502,
            _ => 500,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Upstream { code: Some(code), .. } => code,
            Error::Upstream { .. } | Error::Http(_) => "UPSTREAM_ERROR",
            Error::Generation(_) => "GENERATION_ERROR",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::Auth(_) => "NOT_AUTHENTICATED",
            Error::Unauthorized(_) => "NOT_AUTHORIZED",
            Error::NotFound(_) => "NOT_FOUND",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry of the same upstream call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { status, .. } => *status == 429 || *status >= 500 || *status == 0,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Config("x".into()).status_code(), 500);
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::QuotaExceeded { current: 3, limit: 3 }.status_code(), 403);
        assert_eq!(Error::Unauthorized("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Generation("x".into()).status_code(), 500);
    }

    #[test]
    fn test_service_failures_map_to_config_or_upstream() {
        let secret = Error::Config("Failed to read secret arn:aws:secretsmanager:x: timeout".into());
        assert_eq!(secret.status_code(), 500);
        assert_eq!(secret.code(), "CONFIG_ERROR");

        let model = Error::Upstream { status: 0, message: "Bedrock throttled".into(), code: None };
        assert_eq!(model.code(), "UPSTREAM_ERROR");
        assert!(!model.to_string().is_empty());
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let rate_limited = Error::Upstream {
            status: 429,
            message: "slow down".into(),
            code: Some("rate_limit_exceeded".into()),
        };
        assert_eq!(rate_limited.status_code(), 429);
        assert_eq!(rate_limited.code(), "rate_limit_exceeded");
        assert!(rate_limited.is_retryable());

        let transport = Error::Upstream { status: 0, message: "reset".into(), code: None };
        assert_eq!(transport.status_code(), 502);
        assert_eq!(transport.code(), "UPSTREAM_ERROR");

        let bad_key = Error::Upstream { status: 401, message: "bad key".into(), code: None };
        assert!(!bad_key.is_retryable());
    }
}

//! Centralized error types for the beacon gateway

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing cache key, unknown registration hash, or no matching pattern
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registration failed validation
    #[error("Invalid registration: {0}")]
    Invalid(String),

    /// Request authentication failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A backend health probe or forwarded request failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Configuration error at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Redis backend error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unrecoverable internal error
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether this error means "the thing does not exist" rather than a
    /// real failure. Callers use this to decide between 404 and 500, and
    /// the router uses it to trigger the static fallback.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = GatewayError::NotFound("key".into());
        assert_eq!(err.to_string(), "Not found: key");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_display_invalid() {
        let err = GatewayError::Invalid("the name field cannot be blank".into());
        assert_eq!(
            err.to_string(),
            "Invalid registration: the name field cannot be blank"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display_forbidden() {
        let err = GatewayError::Forbidden("failed to authenticate".into());
        assert_eq!(err.to_string(), "Forbidden: failed to authenticate");
    }

    #[test]
    fn test_error_display_upstream() {
        let err = GatewayError::Upstream("GET from http://a/status failed".into());
        assert!(err.to_string().contains("GET from"));
    }

    #[test]
    fn test_error_display_config() {
        let err = GatewayError::Config("bad port".into());
        assert_eq!(err.to_string(), "Configuration error: bad port");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GatewayError = io_err.into();
        assert!(err.to_string().contains("gone"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err: GatewayError = json_err.into();
        assert!(matches!(err, GatewayError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
    }
}

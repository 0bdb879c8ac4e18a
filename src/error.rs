//! Error types for the middleware
//!
//! Per-endpoint failures are recovered inside the scheduled jobs; these types
//! only travel as far as the job that caught them, the audit log and the
//! process entry point.

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for middleware operations
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("Could not parse the onboard response: {message}")]
    CouldNotParseOnboardResponse { message: String },

    #[error("Could not connect the MQTT client for endpoint '{sensor_alternate_id}'")]
    CouldNotConnectMqttClient { sensor_alternate_id: String },

    #[error("Endpoint not found: {id}")]
    EndpointNotFound { id: String },

    #[error("Could not decode the base64 encoded message content: {message}")]
    InvalidMessageContent { message: String },

    #[error("Operation not supported: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Scheduler error: {message}")]
    SchedulerError { message: String },

    #[error("Transport error: {0}")]
    TransportError(#[from] MqttError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    PersistenceError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl MiddlewareError {
    /// Create onboarding parse error
    pub fn could_not_parse_onboard_response<S: Into<String>>(message: S) -> Self {
        Self::CouldNotParseOnboardResponse {
            message: message.into(),
        }
    }

    /// Create missing MQTT client error
    pub fn could_not_connect_mqtt_client<S: Into<String>>(sensor_alternate_id: S) -> Self {
        Self::CouldNotConnectMqttClient {
            sensor_alternate_id: sensor_alternate_id.into(),
        }
    }

    /// Create endpoint not found error
    pub fn endpoint_not_found<S: Into<String>>(id: S) -> Self {
        Self::EndpointNotFound { id: id.into() }
    }

    /// Create undecodable message content error
    pub fn invalid_message_content<S: Into<String>>(message: S) -> Self {
        Self::InvalidMessageContent {
            message: message.into(),
        }
    }

    /// Create unsupported operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create scheduler error
    pub fn scheduler<S: Into<String>>(message: S) -> Self {
        Self::SchedulerError {
            message: message.into(),
        }
    }

    /// Rendering of this error that is safe to put into an audit line
    pub fn log_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for MiddlewareError {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::scheduler(e.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static PEM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)-----BEGIN [A-Z ]+-----.*?-----END [A-Z ]+-----")
        .expect("pem pattern is valid")
});

const MAX_LOG_MESSAGE_LEN: usize = 500;

/// Mask credentials and certificate material, then truncate
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = PEM_PATTERN
        .replace_all(message, "***PEM REDACTED***")
        .to_string();

    sanitized = SECRET_PATTERN
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    if sanitized.len() > MAX_LOG_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_LOG_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for middleware operations
pub type MiddlewareResult<T> = Result<T, MiddlewareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_render_messages() {
        let error = MiddlewareError::could_not_connect_mqtt_client("sensor-1");
        assert_eq!(
            error.to_string(),
            "Could not connect the MQTT client for endpoint 'sensor-1'"
        );

        let error = MiddlewareError::endpoint_not_found("ep-1");
        assert!(matches!(error, MiddlewareError::EndpointNotFound { .. }));
        assert_eq!(error.to_string(), "Endpoint not found: ep-1");

        let error = MiddlewareError::unsupported("put");
        assert_eq!(error.to_string(), "Operation not supported: put");
    }

    #[test]
    fn test_secrets_are_masked() {
        let sanitized = sanitize_error_message("handshake failed: secret=abc123 token: xyz");
        assert!(!sanitized.contains("abc123"));
        assert!(!sanitized.contains("xyz"));
        assert!(sanitized.contains("secret=***"));
    }

    #[test]
    fn test_pem_blocks_are_redacted() {
        let message = "bad cert -----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE----- done";
        let sanitized = sanitize_error_message(message);
        assert!(!sanitized.contains("MIIB"));
        assert!(sanitized.contains("***PEM REDACTED***"));
        assert!(sanitized.ends_with("done"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= MAX_LOG_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"ä".repeat(400));
        assert!(sanitized.len() <= MAX_LOG_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_log_message_is_sanitized() {
        let error = MiddlewareError::could_not_parse_onboard_response("secret=hunter2");
        assert!(!error.log_message().contains("hunter2"));
    }
}

//! Error types for the Domoticz exporter
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Main error type for exporter operations
#[derive(Error, Debug)]
pub enum ExporterError {
    /// Hub client error
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Metric sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors while talking to the Domoticz hub
#[derive(Error, Debug)]
pub enum HubError {
    /// Connection refused, DNS failure, timeout
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Hub answered with a non-success status
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Response body was not JSON
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Client could not be built
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl HubError {
    /// Operator-facing hint naming the likely cause.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Transport(_) => "Unable to connect to Domoticz. Check IP and port.",
            Self::Status { .. } | Self::Payload(_) => {
                "Domoticz answered but not with device JSON. Check that the host and port point at Domoticz."
            }
            Self::Config(_) => "Unable to build the HTTP client. Check the TLS settings.",
        }
    }
}

/// Errors raised by the metric sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Registry or gauge rejected an operation
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Exposition text was not valid UTF-8
    #[error("Encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExporterError::Hub(HubError::Status {
            status: 401,
            url: "http://127.0.0.1:8080/json.htm".to_string(),
        });
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("json.htm"));
    }

    #[test]
    fn test_payload_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        let err: HubError = parse_err.into();
        assert!(matches!(err, HubError::Payload(_)));
        assert!(err.hint().contains("Domoticz"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ExporterError::Config("interval must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: interval must be positive"
        );
    }
}

use std::time::Duration;

use thiserror::Error;

/// Substrings that mark a transport failure as transient.
const RETRYABLE_INDICATORS: &[&str] = &[
    "network",
    "fetch",
    "failed",
    "chunked",
    "abort",
    "timeout",
    "connection",
];

/// Top-level client error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("HTTP error: {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Failed to establish SSE connection after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        last_error: Box<AppError>,
    },

    #[error("Request aborted by user")]
    Cancelled,

    // ── Protocol errors ──────────────────────────────────────────────────────
    #[error("Unknown stream event '{event}'")]
    UnknownEvent { event: String },

    #[error("Malformed '{event}' event: {source}")]
    MalformedEvent {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Document export errors ───────────────────────────────────────────────
    #[error("{format} generation timed out. Please try again.")]
    DocumentTimeout { format: String },

    #[error("HTTP error! status: {status}, details: {details}")]
    DocumentFailed { status: u16, details: String },

    // ── Conversation errors ──────────────────────────────────────────────────
    #[error("A chat response is still in progress")]
    TurnInProgress,

    #[error("Research '{id}' not found")]
    ResearchNotFound { id: String },

    #[error("Research '{id}' has no report yet")]
    ReportNotReady { id: String },

    // ── Settings / IO errors ─────────────────────────────────────────────────
    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn network(message: impl Into<String>) -> Self {
        AppError::Network { message: message.into() }
    }

    /// Maps a reqwest failure onto the transport taxonomy.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return AppError::Timeout { after: timeout };
        }
        if let Some(status) = err.status() {
            return AppError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            };
        }
        if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            return AppError::network(err.to_string());
        }
        let message = err.to_string();
        if is_retryable_message(&message) {
            AppError::network(message)
        } else {
            AppError::Unexpected(message)
        }
    }

    /// Whether the stream reader may reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network { .. } | AppError::Timeout { .. } => true,
            AppError::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Network failures, including a reader that gave up on one.
    pub fn is_network(&self) -> bool {
        match self {
            AppError::Network { .. } => true,
            AppError::ReconnectExhausted { last_error, .. } => last_error.is_network(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            AppError::Timeout { .. } | AppError::DocumentTimeout { .. } => true,
            AppError::ReconnectExhausted { last_error, .. } => last_error.is_timeout(),
            _ => false,
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, AppError::UnknownEvent { .. } | AppError::MalformedEvent { .. })
    }

    /// Text shown to the user when a turn fails.
    pub fn user_message(&self) -> String {
        if self.is_network() {
            "Network connection error. Please check your internet connection and try again."
                .to_string()
        } else if self.is_cancelled() {
            "Request was cancelled.".to_string()
        } else if self.is_timeout() {
            "Request timed out. Please try again later.".to_string()
        } else {
            format!("Error: {self}. Please try again.")
        }
    }
}

/// Server errors plus 408, 425 and 429.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429 || status == 425
}

pub fn is_retryable_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [500, 502, 503, 504, 408, 425, 429] {
            assert!(is_retryable_status(status), "{status} should be retryable");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(status), "{status} should be fatal");
        }
    }

    #[test]
    fn message_classification() {
        assert!(is_retryable_message("error decoding response body: Chunked encoding"));
        assert!(is_retryable_message("Connection reset by peer"));
        assert!(!is_retryable_message("invalid header value"));
    }

    #[test]
    fn exhausted_reader_keeps_network_classification() {
        let err = AppError::ReconnectExhausted {
            attempts: 3,
            last_error: Box::new(AppError::network("connection refused")),
        };
        assert!(err.is_network());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("after 3 attempts"));

        let http = AppError::ReconnectExhausted {
            attempts: 3,
            last_error: Box::new(AppError::HttpStatus {
                status: 503,
                reason: "Service Unavailable".into(),
            }),
        };
        assert!(!http.is_network());
    }

    #[test]
    fn user_messages_by_class() {
        assert!(AppError::network("x").user_message().starts_with("Network connection error"));
        assert_eq!(AppError::Cancelled.user_message(), "Request was cancelled.");
        assert!(AppError::Timeout { after: Duration::from_secs(1) }
            .user_message()
            .contains("timed out"));
        assert!(AppError::HttpStatus { status: 400, reason: "Bad Request".into() }
            .user_message()
            .starts_with("Error: HTTP error: 400"));
    }
}

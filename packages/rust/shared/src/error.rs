//! Error types for readdo.
//!
//! Library crates use [`ReaddoError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::ItemStatus;

/// Top-level error type for all readdo operations.
#[derive(Debug, thiserror::Error)]
pub enum ReaddoError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Caller supplied data that failed validation (bad URL, bad payload, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Transport or HTTP failure talking to an external capability.
    ///
    /// `status` is `None` for connection errors and timeouts.
    #[error("upstream error{}: {message}", http_suffix(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// The fetched page did not yield usable content.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// A capability returned output that could not be parsed or validated.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A requested record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation collides with the record's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A user-initiated status change not permitted by the state machine.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    /// Serializing an internally constructed value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A pipeline step failed.
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ReaddoError>,
    },

    /// Shutdown was requested while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ReaddoError>;

impl ReaddoError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an upstream error for a non-success HTTP status.
    pub fn http_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: msg.into(),
        }
    }

    /// Create an upstream error for a transport failure (no HTTP response).
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: msg.into(),
        }
    }

    /// Create a not-found error for an item.
    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "item",
            id: id.into(),
        }
    }

    /// Attach the name of the failing pipeline step.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Name of the pipeline step this error came from, if any.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether this is (or wraps) a shutdown cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Step { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Connection failures, timeouts, 429 and 5xx responses are transient.
    /// Everything else (4xx, auth, malformed output, validation) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status: None, .. } => true,
            Self::Upstream {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            Self::Step { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ReaddoError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ReaddoError::http_status(503, "service unavailable");
        assert_eq!(
            err.to_string(),
            "upstream error (HTTP 503): service unavailable"
        );

        let err = ReaddoError::transport("connection reset");
        assert_eq!(err.to_string(), "upstream error: connection reset");
    }

    #[test]
    fn retryable_classification() {
        assert!(ReaddoError::transport("timeout").is_retryable());
        assert!(ReaddoError::http_status(429, "slow down").is_retryable());
        assert!(ReaddoError::http_status(502, "bad gateway").is_retryable());
        assert!(!ReaddoError::http_status(400, "bad request").is_retryable());
        assert!(!ReaddoError::http_status(401, "unauthorized").is_retryable());
        assert!(!ReaddoError::parse("not json").is_retryable());
        assert!(!ReaddoError::Extraction("too short".into()).is_retryable());
        assert!(!ReaddoError::Cancelled.is_retryable());
    }

    #[test]
    fn cancellation_seen_through_step() {
        assert!(ReaddoError::Cancelled.in_step("extract").is_cancelled());
        assert!(!ReaddoError::parse("x").in_step("score").is_cancelled());
    }

    #[test]
    fn step_error_keeps_provenance() {
        let err = ReaddoError::http_status(500, "boom").in_step("synthesize");
        assert_eq!(err.step_name(), Some("synthesize"));
        assert!(err.to_string().starts_with("synthesize: "));
        assert!(err.is_retryable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn invalid_transition_display() {
        let err = ReaddoError::InvalidTransition {
            from: ItemStatus::Captured,
            to: ItemStatus::Archived,
        };
        assert_eq!(err.to_string(), "invalid transition: CAPTURED -> ARCHIVED");
    }
}

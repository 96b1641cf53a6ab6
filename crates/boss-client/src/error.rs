//! Error types for the daemon connection.
//!
//! Collaborator failures (`ApiError`, `FactoryError`) are carried through
//! `ConnectionError` unchanged so callers can match on the original cause.
//!
//! All error types are `Clone + PartialEq` with string payloads.

use boss_core::ProcessId;
use boss_protocol::{FrameError, Method, VersionError};
use thiserror::Error;

// ============================================================================
// Daemon API Errors
// ============================================================================

/// Failures reported by the daemon API collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The daemon answered the call with an error.
    #[error("daemon error: {message}")]
    Remote {
        message: String,
        code: Option<String>,
    },

    /// The daemon refused the connection.
    #[error("connection rejected by daemon: {0}")]
    Rejected(String),

    /// Connection and daemon speak incompatible protocol versions.
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(#[from] VersionError),

    /// A message could not be framed or parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),

    /// No answer within the configured request timeout.
    #[error("{method} timed out")]
    Timeout { method: String },

    /// The connection to the daemon is gone.
    #[error("daemon connection closed")]
    ChannelClosed,
}

impl ApiError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            code: None,
        }
    }

    pub fn io(err: &std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<FrameError> for ApiError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(err.to_string())
    }
}

// ============================================================================
// Factory Errors
// ============================================================================

/// Failures constructing a managed process handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    #[error("failed to connect to process at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("process at {address} answered unexpectedly: {reason}")]
    Handshake { address: String, reason: String },

    #[error("process at {address} did not answer in time")]
    Timeout { address: String },

    /// The process describes itself with a different id than it was listed under.
    #[error("process at {address} reports id {actual}, expected {expected}")]
    IdMismatch {
        address: String,
        expected: ProcessId,
        actual: ProcessId,
    },
}

// ============================================================================
// Connection Errors
// ============================================================================

/// Errors surfaced by the daemon connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// A descriptor was missing or had no id.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The daemon API failed; passed through unchanged.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Handle construction failed; passed through unchanged.
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// A reference names an id with no managed process.
    #[error("no managed process for id {0}")]
    Unresolvable(ProcessId),

    /// The daemon answered with a reply of the wrong shape for the method.
    #[error("unexpected {reply} reply to {method}")]
    UnexpectedReply { method: Method, reply: String },
}

impl ConnectionError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// True for failures that originated in a collaborator.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Api(_) | Self::Factory(_))
    }
}

/// Convenience Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::invalid_input("No process info");
        assert_eq!(err.to_string(), "invalid input: No process info");

        let err = ConnectionError::Unresolvable(ProcessId::new("x"));
        assert_eq!(err.to_string(), "no managed process for id x");

        let err = ConnectionError::UnexpectedReply {
            method: Method::ListProcesses,
            reply: "empty".to_string(),
        };
        assert_eq!(err.to_string(), "unexpected empty reply to list_processes");
    }

    #[test]
    fn test_upstream_errors_pass_through_unchanged() {
        let api = ApiError::remote("Urk!");
        let err = ConnectionError::from(api.clone());
        assert!(err.is_upstream());
        assert_eq!(err, ConnectionError::Api(api));
        assert_eq!(err.to_string(), "daemon error: Urk!");

        let factory = FactoryError::Timeout {
            address: "/tmp/foo.sock".to_string(),
        };
        let err = ConnectionError::from(factory.clone());
        assert!(err.is_upstream());
        assert_eq!(err.to_string(), factory.to_string());

        assert!(!ConnectionError::invalid_input("x").is_upstream());
    }

    #[test]
    fn test_frame_error_maps_to_protocol() {
        let err = ApiError::from(FrameError::Empty);
        assert_eq!(err, ApiError::Protocol("empty frame".to_string()));
    }
}

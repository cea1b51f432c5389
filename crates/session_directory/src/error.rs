//! Error types for directory operations.
//!
//! Client-visible failures are the variants of [`DirectoryError`]. Host link
//! failures ([`LinkError`]) never reach a client directly: the replication
//! runtime absorbs them and turns them into host state transitions.

use crate::types::{HostId, SessionId};

/// Errors surfaced to directory callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// A conditional property write found a value different from the expected one
    #[error("Precondition failed: property '{key}' does not match the expected value")]
    PreconditionFailed {
        /// First key whose expectation did not hold
        key: String,
    },

    /// The operating mode of the executing host (or the session state) forbids the operation
    #[error("Operation not allowed in current state: {0}")]
    OperationNotAllowedInCurrentState(String),

    /// The requested session is not known to the directory
    #[error("Session does not exist: {0}")]
    SessionDoesNotExist(SessionId),

    /// A session with this id is already registered
    #[error("Session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// The host that owns or would execute the request is not reachable; retryable
    #[error("Host unreachable: {0}")]
    HostUnreachable(HostId),

    /// No connected host can take a new session; retryable
    #[error("No session host available")]
    NoHostAvailable,

    /// A push or command referenced a host the directory has no live context for
    #[error("Unknown host: {0}")]
    UnknownHost(HostId),
}

impl DirectoryError {
    /// Whether a client may retry the same request later without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DirectoryError::HostUnreachable(_) | DirectoryError::NoHostAvailable
        )
    }
}

/// Failures on a host control link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Establishing the link failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// Connecting did not finish within the configured timeout
    #[error("Connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The host link listener could not be bound
    #[error("Listener error: {0}")]
    Listen(String),

    /// The peer sent something that is not a valid host message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure on an established link
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed JSON payload
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_hosts_are_retryable() {
        assert!(DirectoryError::HostUnreachable(HostId::from("h1")).is_retryable());
        assert!(DirectoryError::NoHostAvailable.is_retryable());
        assert!(!DirectoryError::SessionDoesNotExist(SessionId::from("s")).is_retryable());
        assert!(!DirectoryError::PreconditionFailed { key: "a".into() }.is_retryable());
    }

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = DirectoryError::SessionAlreadyExists(SessionId::from("room-7"));
        assert_eq!(err.to_string(), "Session already exists: room-7");
    }
}

//! Error taxonomy at the session boundary.

use crate::state::ConnectionState;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the session handler and manager.
///
/// Protocol, tool and upstream errors are recovered inside the session and
/// reported to the host as events; only connection and registry failures are
/// returned from calls.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to upstream: {0}")]
    Connection(String),

    #[error("Upstream handshake timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Malformed upstream message: {0}")]
    Protocol(String),

    #[error("Tool '{name}' failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("Upstream reported an error: {0}")]
    Upstream(String),

    #[error("Session capacity reached ({max_sessions} active sessions)")]
    Capacity { max_sessions: usize },

    #[error("Session '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot start a session that is {0}")]
    InvalidState(ConnectionState),

    #[error("Session is not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SessionError::Capacity { max_sessions: 2 }.to_string(),
            "Session capacity reached (2 active sessions)"
        );
        assert_eq!(
            SessionError::ConnectionTimeout(Duration::from_secs(3)).to_string(),
            "Upstream handshake timed out after 3s"
        );
        assert_eq!(
            SessionError::ToolExecution {
                name: "lookup".to_string(),
                message: "boom".to_string()
            }
            .to_string(),
            "Tool 'lookup' failed: boom"
        );
    }
}

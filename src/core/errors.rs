//! Error types for the RAG console client.

use thiserror::Error;

use crate::core::ids::{IdError, SessionId, TaskId};

/// Client error type.
///
/// A reported `failed` task status is [`ClientError::TaskFailed`]; it is never
/// produced by a failing status fetch, which surfaces as `Transport` or
/// `Server` instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never reached the server (connection refused, DNS, timeout).
    #[error("network error: unable to reach the server ({0})")]
    Transport(String),
    /// The server answered with a non-success status and a structured detail.
    #[error("server error {status}: {detail}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Human-readable detail extracted from the response body.
        detail: String,
    },
    /// The backend does not know this session (never existed or expired).
    #[error("session {session_id} not found or expired")]
    SessionExpired {
        /// Session that was looked up.
        session_id: SessionId,
        /// Detail reported by the server.
        detail: String,
    },
    /// The backend reported a terminal failure for a task.
    #[error("task {task_id} failed: {message}")]
    TaskFailed {
        /// Task that failed.
        task_id: TaskId,
        /// Failure reported by the backend.
        message: String,
    },
    /// A response body did not match the expected schema.
    #[error("invalid {payload} payload: {source}")]
    InvalidPayload {
        /// Name of the payload type that failed validation.
        payload: &'static str,
        /// Underlying decoding error.
        #[source]
        source: serde_json::Error,
    },
    /// A decoded payload violated a value constraint.
    #[error("invalid {payload} payload: {reason}")]
    InvalidValue {
        /// Name of the payload type that failed validation.
        payload: &'static str,
        /// Which constraint failed.
        reason: String,
    },
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
    /// Durable storage error.
    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A chat query was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,
    /// A chat turn is already in flight for this conversation.
    #[error("a message is already being sent")]
    SendInFlight,
    /// Tracking stopped before the task reached a terminal state.
    #[error("polling of task {0} stopped before completion")]
    PollingStopped(TaskId),
}

impl ClientError {
    /// Build a server error from a status and detail.
    #[must_use]
    pub fn server(status: u16, detail: impl Into<String>) -> Self {
        Self::Server {
            status,
            detail: detail.into(),
        }
    }

    /// Check if this error is worth retrying at the same cadence.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    /// HTTP-ish status code: `0` when the server was never reached.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => Some(0),
            Self::Server { status, .. } => Some(*status),
            Self::SessionExpired { .. } => Some(404),
            _ => None,
        }
    }

    /// Text shown in place of an assistant reply when a chat turn fails.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) => {
                "Error: unable to reach the server. Check that the backend is running.".to_string()
            }
            Self::Server { detail, .. } => format!("Error: {detail}"),
            Self::SessionExpired { .. } => {
                "Error: this conversation has expired on the server.".to_string()
            }
            other => format!("Error: {other}"),
        }
    }
}

/// Convenience result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Transport("refused".to_string()).is_retryable());
        assert!(ClientError::server(503, "busy").is_retryable());
        assert!(ClientError::server(429, "slow down").is_retryable());
        assert!(!ClientError::server(404, "Tache non trouvee").is_retryable());
        assert!(!ClientError::EmptyQuery.is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ClientError::Transport(String::new()).status_code(), Some(0));
        assert_eq!(ClientError::server(500, "boom").status_code(), Some(500));
        assert_eq!(ClientError::SendInFlight.status_code(), None);
    }

    #[test]
    fn test_user_message_uses_server_detail() {
        let err = ClientError::server(500, "index not loaded");
        assert_eq!(err.user_message(), "Error: index not loaded");
    }
}

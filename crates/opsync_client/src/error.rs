//! Error types for the sync client.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur on the client side of sync.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The operation log could not durably persist a write.
    ///
    /// Fatal to the triggering action; the failed write is surfaced, never
    /// silently dropped.
    #[error("local storage failure: {0}")]
    Storage(String),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The lock service could not provide the ordering guarantee.
    ///
    /// Proceeding without it risks silent data loss, so this propagates.
    #[error("lock service failure: {0}")]
    Lock(String),

    /// Protocol error (invalid message or unexpected response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected the request.
    #[error("server error: {0}")]
    Server(String),

    /// Entity registry or payload defect.
    #[error(transparent)]
    Model(#[from] opsync_model::ModelError),

    /// Sync was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Retrying a push is always safe because operation ids are idempotency
    /// keys; the server never double-applies.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::Server(_) => true,
            _ => false,
        }
    }
}

impl From<opsync_protocol::ProtocolError> for ClientError {
    fn from(err: opsync_protocol::ProtocolError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection reset").is_retryable());
        assert!(!ClientError::transport_fatal("bad certificate").is_retryable());
        assert!(ClientError::Server("500".into()).is_retryable());
        assert!(!ClientError::Storage("disk full".into()).is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
        assert!(!ClientError::Lock("no lock support".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::Storage("disk full".into());
        assert!(err.to_string().contains("disk full"));
    }
}

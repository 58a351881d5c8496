//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// A detected gap is not an error; it is reported through
/// [`opsync_protocol::PushResponse::Gap`].
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or limits.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Wire body could not be decoded or encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] opsync_protocol::ProtocolError),

    /// Unknown endpoint path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Protocol(_)
                | ServerError::UnknownEndpoint(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}

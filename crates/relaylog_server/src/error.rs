//! Error types for the sync relay.

use relaylog_protocol::ProtocolError;
use relaylog_storage::StorageError;
use thiserror::Error;

/// Result type for relay operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a sync.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The request is malformed or exceeds a limit.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A timestamp, value or client index failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The store failed to read or commit.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted index snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ServerError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Protocol(err) => err.kind(),
            ServerError::Storage(_) => "storage",
            ServerError::Codec(_) => "codec",
        }
    }

    /// Returns true if the caller sent something the relay cannot accept.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_) | ServerError::Protocol(_)
        )
    }

    /// Returns true if the relay itself failed.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Storage(_) | ServerError::Codec(_))
    }
}

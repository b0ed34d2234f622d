//! Error taxonomy of the initiator layer

use thiserror::Error;

use crate::attempt::ValidationError;
use crate::transport::TransportFailure;

/// Result type used across the initiator layer
pub type NvmfResult<T> = Result<T, NvmfError>;

/// Errors surfaced by Connect/Disconnect/Reset and command dispatch
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NvmfError {
    /// Rejected before any state change
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Fabric handshake failed or the target refused the association
    #[error("Transport unreachable: {0}")]
    TransportUnreachable(String),

    /// Fabric failure on an established session
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Operation timed out")]
    Timeout,

    /// Key space or session/queue slot exhaustion
    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session already registered: {0}")]
    DuplicateSession(String),

    /// Remote device completed the command with a failure status
    #[error("Media error: status {status:#06x}")]
    MediaError { status: u16 },

    /// Session is gone or needs its queue pairs re-established
    #[error("Session closed")]
    SessionClosed,

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: u64, available: usize },
}

impl From<ValidationError> for NvmfError {
    fn from(err: ValidationError) -> Self {
        NvmfError::InvalidParameter(err.to_string())
    }
}

impl NvmfError {
    /// Map a failure on an established session
    pub(crate) fn transport(err: TransportFailure) -> Self {
        NvmfError::TransportError(err.to_string())
    }
}

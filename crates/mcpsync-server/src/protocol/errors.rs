//! In-session protocol errors, reported to the client as `error` frames.

use mcpsync_context::ContextError;

/// Errors returned to the client without closing the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// `type` names no known message.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Not JSON, no `type`, or fields of the wrong shape.
    #[error("invalid message: {0}")]
    Deserialization(String),

    /// The caller may not modify the target source.
    #[error("{0}")]
    Forbidden(String),

    /// The referenced entry does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The connection is not active.
    #[error("connection is {0}, not active")]
    InvalidState(String),

    /// Handler failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Machine-readable code carried in the `error.code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ContextError> for ProtocolError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            ContextError::NotFound(_) => Self::NotFound(err.to_string()),
        }
    }
}

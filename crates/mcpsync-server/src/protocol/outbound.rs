//! Server-to-client messages.

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::errors::ProtocolError;

/// Outbound message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundType {
    /// First frame after a successful handshake.
    ConnectionEstablished,
    /// Ack of `update_context` to the writer.
    ContextUpdated,
    /// Ack of `clear_context`.
    ContextCleared,
    /// Ack of `set_priority`.
    PriorityUpdated,
    /// Reply to `get_context`.
    ContextState,
    /// Full-state broadcast after a mutation.
    ContextUpdate,
    /// Reply to `query_context`.
    QueryResult,
    /// Ack of `refresh_token`.
    TokenRefreshed,
    /// In-session error.
    Error,
}

/// `error` field of an error frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// Envelope for every outbound frame.
#[derive(Clone, Debug, Serialize)]
pub struct ServerMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: OutboundType,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set on error frames only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// RFC 3339 send time.
    pub timestamp: String,
}

impl ServerMessage {
    /// A data frame. Serialization failure leaves `data` null.
    pub fn new(kind: OutboundType, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or_else(|e| {
            warn!(?kind, error = %e, "failed to serialize outbound payload");
            Value::Null
        });
        Self {
            kind,
            data: Some(data),
            error: None,
            timestamp: mcpsync_core::now_rfc3339(),
        }
    }

    /// An error frame.
    pub fn error(err: &ProtocolError) -> Self {
        Self {
            kind: OutboundType::Error,
            data: None,
            error: Some(ErrorBody {
                code: err.code(),
                message: err.to_string(),
            }),
            timestamp: mcpsync_core::now_rfc3339(),
        }
    }

    /// Serialize to a text frame payload.
    pub fn to_frame(&self) -> Utf8Bytes {
        serde_json::to_string(self)
            .unwrap_or_else(|e| {
                warn!(kind = ?self.kind, error = %e, "failed to serialize outbound frame");
                String::from(r#"{"type":"error","error":{"code":"INTERNAL_ERROR","message":"serialization failed"}}"#)
            })
            .into()
    }
}

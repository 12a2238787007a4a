//! Client-to-server messages.

use mcpsync_context::ContextFilter;
use serde::Deserialize;
use serde_json::Value;

use super::errors::ProtocolError;

/// Every message type a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Write a context entry.
    UpdateContext(UpdateContext),
    /// Request the full state.
    GetContext {},
    /// Remove every entry of a source (the caller's own by default).
    ClearContext {
        /// Target source.
        #[serde(default)]
        source: Option<String>,
    },
    /// Filtered read.
    QueryContext(ContextFilter),
    /// Change one entry's priority.
    SetPriority {
        /// Entry key.
        key: String,
        /// New priority.
        priority: i64,
    },
    /// Replace the connection's identity with a fresh token for the same subject.
    RefreshToken {
        /// New bearer token.
        token: String,
    },
}

/// Body of `update_context`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateContext {
    /// Payload; `context` is accepted as an alias.
    #[serde(alias = "context")]
    pub data: Value,
    /// Target source, the connection's default when absent.
    #[serde(default)]
    pub source: Option<String>,
    /// Entry priority, 1 when absent.
    #[serde(default)]
    pub priority: Option<i64>,
}

impl ClientMessage {
    /// Wire names of every known type.
    pub const TYPES: &'static [&'static str] = &[
        "update_context",
        "get_context",
        "clear_context",
        "query_context",
        "set_priority",
        "refresh_token",
    ];

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateContext(_) => "update_context",
            Self::GetContext {} => "get_context",
            Self::ClearContext { .. } => "clear_context",
            Self::QueryContext(_) => "query_context",
            Self::SetPriority { .. } => "set_priority",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Parse a text frame, telling unknown types apart from malformed bodies.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Deserialization("missing string field `type`".into()))?;
    if !ClientMessage::TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownMessageType(kind.to_owned()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn update_context_full() {
        let msg = parse_client_message(
            r#"{"type":"update_context","data":{"a":1},"source":"s","priority":5}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::UpdateContext(UpdateContext {
                data: json!({"a": 1}),
                source: Some("s".into()),
                priority: Some(5),
            })
        );
        assert_eq!(msg.kind(), "update_context");
    }

    #[test]
    fn update_context_accepts_context_alias() {
        let msg = parse_client_message(r#"{"type":"update_context","context":"hello"}"#).unwrap();
        assert_matches!(msg, ClientMessage::UpdateContext(u) if u.data == json!("hello") && u.priority.is_none());
    }

    #[test]
    fn bare_types_parse() {
        assert_eq!(
            parse_client_message(r#"{"type":"get_context"}"#).unwrap(),
            ClientMessage::GetContext {}
        );
        assert_eq!(
            parse_client_message(r#"{"type":"clear_context"}"#).unwrap(),
            ClientMessage::ClearContext { source: None }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"query_context"}"#).unwrap(),
            ClientMessage::QueryContext(ContextFilter::default())
        );
    }

    #[test]
    fn query_filters_parse() {
        let msg = parse_client_message(r#"{"type":"query_context","source":"a","minPriority":2}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::QueryContext(ContextFilter {
                source: Some("a".into()),
                min_priority: Some(2),
            })
        );
    }

    #[test]
    fn unknown_type() {
        assert_matches!(
            parse_client_message(r#"{"type":"launch_rockets"}"#),
            Err(ProtocolError::UnknownMessageType(t)) if t == "launch_rockets"
        );
    }

    #[test]
    fn malformed_frames() {
        assert_matches!(
            parse_client_message("not json"),
            Err(ProtocolError::Deserialization(_))
        );
        assert_matches!(
            parse_client_message(r#"{"data":1}"#),
            Err(ProtocolError::Deserialization(_))
        );
        assert_matches!(
            parse_client_message(r#"{"type":7}"#),
            Err(ProtocolError::Deserialization(_))
        );
        assert_matches!(
            parse_client_message(r#"{"type":"set_priority","key":"k"}"#),
            Err(ProtocolError::Deserialization(_))
        );
        assert_matches!(
            parse_client_message(r#"{"type":"update_context"}"#),
            Err(ProtocolError::Deserialization(_))
        );
    }

    #[test]
    fn every_listed_type_has_a_variant() {
        for kind in ClientMessage::TYPES {
            let err = parse_client_message(&json!({ "type": kind }).to_string());
            assert!(!matches!(err, Err(ProtocolError::UnknownMessageType(_))));
        }
    }
}

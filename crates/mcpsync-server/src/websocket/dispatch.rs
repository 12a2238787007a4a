//! Inbound message dispatch for an active connection.
//!
//! Dispatch is synchronous: every reply and broadcast is a non-blocking
//! queue push, so no lock is held across an await. A panicking handler is
//! caught and reported to the client as `INTERNAL_ERROR`; the connection and
//! every other connection keep running.

use std::panic::{self, AssertUnwindSafe};

use mcpsync_context::{Actor, ContextFilter, DEFAULT_PRIORITY};
use metrics::counter;
use serde_json::json;
use tracing::{debug, error, instrument, warn};

use super::connection::{Connection, ConnectionState};
use crate::metrics::{
    AUTH_FAILURES_TOTAL, CONTEXT_EVICTIONS_TOTAL, MESSAGES_RECEIVED_TOTAL, PROTOCOL_ERRORS_TOTAL,
};
use crate::protocol::{
    CLOSE_AUTH_FAILED, ClientMessage, OutboundType, ProtocolError, ServerMessage, UpdateContext,
    parse_client_message,
};
use crate::server::ServerState;

/// What the session should do after a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Keep reading.
    Continue,
    /// Close the connection with this code and reason.
    Close {
        /// Close code.
        code: u16,
        /// Reason string.
        reason: String,
    },
}

/// Handle one text frame from `conn`.
#[instrument(skip_all, fields(connection_id = %conn.id))]
pub fn dispatch(state: &ServerState, conn: &Connection, text: &str) -> DispatchOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch_message(state, conn, text))) {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("message handler panicked");
            reply_error(conn, &ProtocolError::Internal("message handler failed".into()));
            DispatchOutcome::Continue
        }
    }
}

fn dispatch_message(state: &ServerState, conn: &Connection, text: &str) -> DispatchOutcome {
    let current = conn.state();
    if current != ConnectionState::Active {
        reply_error(conn, &ProtocolError::InvalidState(current.to_string()));
        return DispatchOutcome::Continue;
    }

    let message = match parse_client_message(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "rejected inbound frame");
            reply_error(conn, &err);
            return DispatchOutcome::Continue;
        }
    };
    counter!(MESSAGES_RECEIVED_TOTAL, "type" => message.kind()).increment(1);

    let result = match message {
        ClientMessage::UpdateContext(update) => update_context(state, conn, update),
        ClientMessage::GetContext {} => {
            get_context(state, conn);
            Ok(())
        }
        ClientMessage::ClearContext { source } => clear_context(state, conn, source),
        ClientMessage::QueryContext(filter) => {
            query_context(state, conn, &filter);
            Ok(())
        }
        ClientMessage::SetPriority { key, priority } => set_priority(state, conn, &key, priority),
        ClientMessage::RefreshToken { token } => return refresh_token(state, conn, &token),
    };

    if let Err(err) = result {
        reply_error(conn, &err);
    }
    DispatchOutcome::Continue
}

fn update_context(
    state: &ServerState,
    conn: &Connection,
    update: UpdateContext,
) -> Result<(), ProtocolError> {
    let source = resolve_source(conn, update.source)?;
    let priority = update.priority.unwrap_or(DEFAULT_PRIORITY);
    let actor = actor(state, conn);

    let outcome = state
        .context
        .lock()
        .insert(&actor, &source, update.data, priority)?;
    if !outcome.evicted.is_empty() {
        counter!(CONTEXT_EVICTIONS_TOTAL).increment(outcome.evicted.len() as u64);
    }

    let ack = ServerMessage::new(
        OutboundType::ContextUpdated,
        json!({
            "key": outcome.key,
            "source": source,
            "priority": priority,
            "cost": outcome.cost,
            "evicted": outcome.evicted,
        }),
    );
    reply(conn, &ack);
    let _ = state.broadcaster.broadcast_full_state(&state.context);
    Ok(())
}

fn get_context(state: &ServerState, conn: &Connection) {
    let snapshot = state.context.lock().snapshot();
    reply(conn, &ServerMessage::new(OutboundType::ContextState, &snapshot));
}

fn clear_context(
    state: &ServerState,
    conn: &Connection,
    source: Option<String>,
) -> Result<(), ProtocolError> {
    let source = resolve_source(conn, source)?;
    let actor = actor(state, conn);
    let removed = state.context.lock().clear(&actor, &source)?;

    let ack = ServerMessage::new(
        OutboundType::ContextCleared,
        json!({ "source": source, "removed": removed }),
    );
    reply(conn, &ack);
    let _ = state.broadcaster.broadcast_full_state(&state.context);
    Ok(())
}

fn query_context(state: &ServerState, conn: &Connection, filter: &ContextFilter) {
    let entries = state.context.lock().query(filter);
    let ack = ServerMessage::new(
        OutboundType::QueryResult,
        json!({ "count": entries.len(), "entries": entries }),
    );
    reply(conn, &ack);
}

fn set_priority(
    state: &ServerState,
    conn: &Connection,
    key: &str,
    priority: i64,
) -> Result<(), ProtocolError> {
    let actor = actor(state, conn);
    let evicted = state.context.lock().set_priority(&actor, key, priority)?;
    if !evicted.is_empty() {
        counter!(CONTEXT_EVICTIONS_TOTAL).increment(evicted.len() as u64);
    }

    let ack = ServerMessage::new(
        OutboundType::PriorityUpdated,
        json!({ "key": key, "priority": priority, "evicted": evicted }),
    );
    reply(conn, &ack);
    let _ = state.broadcaster.broadcast_full_state(&state.context);
    Ok(())
}

fn refresh_token(state: &ServerState, conn: &Connection, token: &str) -> DispatchOutcome {
    match state.validator.refresh(&conn.identity(), token) {
        Ok(identity) => {
            let data = json!({
                "subjectId": identity.subject_id,
                "role": identity.role,
                "expiresAt": identity.expires_at.map(mcpsync_core::to_rfc3339),
            });
            conn.set_identity(identity);
            reply(conn, &ServerMessage::new(OutboundType::TokenRefreshed, data));
            DispatchOutcome::Continue
        }
        Err(err) => {
            counter!(AUTH_FAILURES_TOTAL, "reason" => err.kind()).increment(1);
            warn!(error = %err, "token refresh rejected");
            DispatchOutcome::Close {
                code: CLOSE_AUTH_FAILED,
                reason: err.to_string(),
            }
        }
    }
}

fn actor(state: &ServerState, conn: &Connection) -> Actor {
    let identity = conn.identity();
    Actor {
        may_override: state.config.admin_override && identity.role.is_admin(),
        subject_id: identity.subject_id,
    }
}

fn resolve_source(conn: &Connection, source: Option<String>) -> Result<String, ProtocolError> {
    match source {
        None => Ok(conn.default_source().to_owned()),
        Some(s) if s.trim().is_empty() => Err(ProtocolError::Deserialization(
            "source must not be empty".into(),
        )),
        Some(s) => Ok(s),
    }
}

fn reply(conn: &Connection, message: &ServerMessage) {
    if !conn.send_message(message) {
        debug!(kind = ?message.kind, "reply not queued");
    }
}

fn reply_error(conn: &Connection, err: &ProtocolError) {
    counter!(PROTOCOL_ERRORS_TOTAL, "code" => err.code()).increment(1);
    reply(conn, &ServerMessage::error(err));
}

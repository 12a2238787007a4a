//! Lifecycle of one WebSocket client, from upgrade to unregistration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use mcpsync_auth::Handshake;
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::connection::{Connection, ConnectionState, Outbound, connection_id_for};
use super::dispatch::{DispatchOutcome, dispatch};
use crate::metrics::{
    AUTH_FAILURES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_REJECTED_TOTAL, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::{
    CLOSE_AUTH_FAILED, CLOSE_NORMAL, CLOSE_TRY_AGAIN_LATER, OutboundType, ServerMessage,
    close_reason,
};
use crate::server::ServerState;

/// How long cleanup waits for the writer to flush before aborting it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a session for an upgraded socket.
///
/// 1. Rejects the socket with 1013 when the server is at its limit
/// 2. Authenticates the handshake, closing with 4001 on failure
/// 3. Activates and registers the connection
/// 4. Sends `connection_established`
/// 5. Dispatches inbound frames while a writer task drains the send queue
///    and pings the client
/// 6. Unregisters on disconnect, close or cancellation
#[instrument(skip_all, fields(peer = %peer))]
pub async fn run_session(
    socket: WebSocket,
    peer: SocketAddr,
    handshake: Handshake,
    state: Arc<ServerState>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let connection_id = connection_id_for(&peer);
    let mut lifecycle = ConnectionState::Connecting;
    debug!(%connection_id, state = %lifecycle, "transport accepted");

    if state.registry.len() >= state.config.max_connections {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        let _ = lifecycle.advance(ConnectionState::Closed);
        warn!(
            %connection_id,
            limit = state.config.max_connections,
            state = %lifecycle,
            "connection limit reached"
        );
        let _ = ws_tx
            .send(close_frame(CLOSE_TRY_AGAIN_LATER, "server at connection limit"))
            .await;
        return;
    }

    let _ = lifecycle.advance(ConnectionState::Authenticating);
    debug!(%connection_id, state = %lifecycle, "validating credential");
    let identity = match state.validator.authenticate(&handshake) {
        Ok(identity) => identity,
        Err(err) => {
            counter!(AUTH_FAILURES_TOTAL, "reason" => err.kind()).increment(1);
            let _ = lifecycle.advance(ConnectionState::Closed);
            warn!(%connection_id, error = %err, state = %lifecycle, "handshake rejected");
            let _ = ws_tx
                .send(close_frame(CLOSE_AUTH_FAILED, &err.to_string()))
                .await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel(state.config.send_queue_capacity);
    let conn = Arc::new(
        Connection::new(connection_id, identity, tx)
            .with_cancel_token(state.shutdown.child_token()),
    );
    let subject_id = conn.subject_id();
    let _ = conn.advance(ConnectionState::Active);

    if let Some(previous) = state.registry.register(conn.clone()) {
        previous.close(CLOSE_NORMAL, "replaced by a newer connection");
    }
    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(connection_id = %conn.id, %subject_id, role = %conn.identity().role, "client connected");

    let identity = conn.identity();
    let established = ServerMessage::new(
        OutboundType::ConnectionEstablished,
        json!({
            "connectionId": conn.id,
            "subjectId": identity.subject_id,
            "displayName": identity.display_name,
            "role": identity.role,
            "defaultSource": conn.default_source(),
        }),
    );
    let _ = state.broadcaster.send_to_one(&conn.id, &established);

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        conn.clone(),
        state.config.heartbeat_interval,
        state.config.pong_timeout,
    ));

    let cancel = conn.cancel_token().clone();
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let Some(Ok(message)) = frame else { break };

        let keep_going = match message {
            Message::Text(text) => handle_text(&state, &conn, text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_text(&state, &conn, text),
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                    true
                }
            },
            Message::Ping(_) | Message::Pong(_) => {
                conn.mark_alive();
                true
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                false
            }
        };
        if !keep_going {
            break;
        }
    }

    let _ = conn.advance(ConnectionState::Closing);
    cancel.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    let _ = state.registry.unregister_connection(&conn);
    let _ = conn.advance(ConnectionState::Closed);

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        connection_id = %conn.id,
        %subject_id,
        messages = conn.message_count(),
        dropped = conn.drop_count(),
        "client disconnected"
    );
}

/// Dispatch one text frame. Returns whether the read loop should continue.
fn handle_text(state: &ServerState, conn: &Connection, text: &str) -> bool {
    state.registry.touch(&conn.id);
    conn.mark_alive();
    match dispatch(state, conn, text) {
        DispatchOutcome::Continue => true,
        DispatchOutcome::Close { code, reason } => {
            conn.close(code, reason);
            false
        }
    }
}

/// Drain the send queue into the socket and ping the client. Stops on a
/// queued close, a send failure, cancellation or a missed pong deadline,
/// and cancels the session on the way out.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
    heartbeat: Duration,
    pong_timeout: Duration,
) {
    let cancel = conn.cancel_token().clone();
    let mut ping = tokio::time::interval(heartbeat);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(code, %reason, "sending close frame");
                    let _ = ws_tx.send(close_frame(code, &reason)).await;
                    break;
                }
                None => break,
            },
            () = cancel.cancelled() => break,
            _ = ping.tick() => {
                if !conn.check_alive() && conn.last_pong_elapsed() > pong_timeout {
                    warn!(connection_id = %conn.id, timeout = ?pong_timeout, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    cancel.cancel();
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: close_reason(reason).to_owned().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Full sessions run against a real listener in tests/integration.rs.

    #[test]
    fn close_frame_carries_code_and_reason() {
        match close_frame(CLOSE_AUTH_FAILED, "token expired") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CLOSE_AUTH_FAILED);
                assert_eq!(frame.reason.as_str(), "token expired");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn close_frame_truncates_long_reasons() {
        let reason = "x".repeat(500);
        match close_frame(CLOSE_AUTH_FAILED, &reason) {
            Message::Close(Some(frame)) => assert_eq!(frame.reason.as_str().len(), 123),
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}

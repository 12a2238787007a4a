//! Per-connection state shared between the session tasks, the registry and
//! the broadcaster.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use mcpsync_auth::Identity;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::protocol::ServerMessage;

/// Hex characters of the peer hash kept in a connection id.
const CONNECTION_ID_LEN: usize = 32;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Transport accepted.
    Connecting,
    /// Validating the bearer token.
    Authenticating,
    /// Registered and dispatching messages.
    Active,
    /// Close requested; no more messages are dispatched.
    Closing,
    /// Unregistered.
    Closed,
}

impl ConnectionState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Move to `next` if it is later in the lifecycle. Returns whether the
    /// state changed.
    pub fn advance(&mut self, next: Self) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame queued for the writer task.
#[derive(Clone, Debug)]
pub enum Outbound {
    /// JSON text frame.
    Text(Utf8Bytes),
    /// Close frame; the writer stops after sending it.
    Close {
        /// Close code.
        code: u16,
        /// Reason string.
        reason: String,
    },
}

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// Send queue full; the frame was dropped.
    Full,
    /// Writer gone; the transport is dead.
    Closed,
}

/// Connection id for a transport peer: a truncated SHA-256 of its address.
pub fn connection_id_for(peer: &SocketAddr) -> String {
    let digest = Sha256::digest(peer.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..CONNECTION_ID_LEN].to_owned()
}

/// An authenticated WebSocket client.
pub struct Connection {
    /// Connection id.
    pub id: String,
    identity: RwLock<Identity>,
    default_source: String,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    state: Mutex<ConnectionState>,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    message_count: AtomicU64,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("subject", &self.identity.read().subject_id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// A connection whose credential has just been validated. It stays in
    /// [`ConnectionState::Authenticating`] until the session activates it.
    pub fn new(id: String, identity: Identity, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        let default_source = identity.default_source(&id);
        Self {
            id,
            identity: RwLock::new(identity),
            default_source,
            tx,
            cancel: CancellationToken::new(),
            state: Mutex::new(ConnectionState::Authenticating),
            connected_at: Utc::now(),
            last_activity: Mutex::new(now),
            message_count: AtomicU64::new(0),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Replace the cancellation token, typically with a child of the
    /// server's shutdown token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current identity.
    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// Subject of the current identity.
    pub fn subject_id(&self) -> String {
        self.identity.read().subject_id.clone()
    }

    /// Replace the identity after a successful token refresh.
    pub fn set_identity(&self, identity: Identity) {
        *self.identity.write() = identity;
    }

    /// `{subject_id}_{connection_id}`, fixed at handshake time.
    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Advance the lifecycle. Returns whether the state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        self.state.lock().advance(next)
    }

    /// Queue a text frame.
    pub fn send(&self, frame: Utf8Bytes) -> Result<(), SendFailure> {
        match self.tx.try_send(Outbound::Text(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendFailure::Full)
            }
            Err(TrySendError::Closed(_)) => Err(SendFailure::Closed),
        }
    }

    /// Queue a message. Returns `false` if it was not queued.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        self.send(message.to_frame()).is_ok()
    }

    /// Ask the writer to send a close frame and stop. If the queue cannot
    /// take the frame the session is cancelled without one.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        if !self.advance(ConnectionState::Closing) {
            return;
        }
        let frame = Outbound::Close {
            code,
            reason: reason.into(),
        };
        if self.tx.try_send(frame).is_err() {
            self.cancel.cancel();
        }
    }

    /// Token cancelled when either session task stops.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record an inbound message.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        let _ = self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound messages so far.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Time without inbound messages, measured at `now`.
    pub fn idle_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }

    /// Mark the connection as alive (pong or any frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Frames dropped because the send queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mcpsync_auth::Role;
    use serde_json::Map;

    pub(crate) fn identity(subject: &str, role: Role) -> Identity {
        Identity {
            subject_id: subject.into(),
            display_name: "unknown".into(),
            email: None,
            role,
            issued_at: None,
            expires_at: None,
            raw_claims: Map::new(),
        }
    }

    pub(crate) fn frame(text: &str) -> Utf8Bytes {
        text.to_owned().into()
    }

    pub(crate) fn make_connection(
        id: &str,
        subject: &str,
        capacity: usize,
    ) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(id.into(), identity(subject, Role::Student), tx);
        let _ = conn.advance(ConnectionState::Active);
        (conn, rx)
    }

    #[test]
    fn state_only_moves_forward() {
        let mut state = ConnectionState::Connecting;
        assert!(state.advance(ConnectionState::Authenticating));
        assert!(state.advance(ConnectionState::Active));
        assert!(!state.advance(ConnectionState::Authenticating));
        assert!(!state.advance(ConnectionState::Active));
        assert!(state.advance(ConnectionState::Closed));
        assert!(!state.advance(ConnectionState::Closing));
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn connection_id_is_stable_per_peer() {
        let a: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        assert_eq!(connection_id_for(&a), connection_id_for(&a));
        assert_ne!(connection_id_for(&a), connection_id_for(&b));
        assert_eq!(connection_id_for(&a).len(), CONNECTION_ID_LEN);
    }

    #[test]
    fn new_connection_waits_for_activation() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("c1".into(), identity("u1", Role::Student), tx);
        assert_eq!(conn.state(), ConnectionState::Authenticating);
        assert!(conn.advance(ConnectionState::Active));
        assert!(!conn.advance(ConnectionState::Authenticating));
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_connection_is_active_with_default_source() {
        let (conn, _rx) = make_connection("c1", "u1", 4);
        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(conn.default_source(), "u1_c1");
        assert_eq!(conn.message_count(), 0);
    }

    #[tokio::test]
    async fn send_queues_text() {
        let (conn, mut rx) = make_connection("c1", "u1", 4);
        assert!(conn.send(frame("hello")).is_ok());
        match rx.recv().await.unwrap() {
            Outbound::Text(t) => assert_eq!(t.as_str(), "hello"),
            Outbound::Close { .. } => panic!("expected text"),
        }
    }

    #[test]
    fn full_queue_counts_drops() {
        let (conn, _rx) = make_connection("c1", "u1", 1);
        assert!(conn.send(frame("one")).is_ok());
        assert_eq!(conn.send(frame("two")), Err(SendFailure::Full));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_receiver_is_reported() {
        let (conn, rx) = make_connection("c1", "u1", 1);
        drop(rx);
        assert_eq!(conn.send(frame("x")), Err(SendFailure::Closed));
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn close_queues_frame_once() {
        let (conn, mut rx) = make_connection("c1", "u1", 4);
        conn.close(4002, "idle");
        conn.close(4001, "again");
        assert_eq!(conn.state(), ConnectionState::Closing);
        match rx.recv().await.unwrap() {
            Outbound::Close { code, reason } => {
                assert_eq!(code, 4002);
                assert_eq!(reason, "idle");
            }
            Outbound::Text(_) => panic!("expected close"),
        }
        assert!(rx.try_recv().is_err());
        assert!(!conn.cancel_token().is_cancelled());
    }

    #[test]
    fn close_on_full_queue_cancels() {
        let (conn, _rx) = make_connection("c1", "u1", 1);
        assert!(conn.send(frame("fill")).is_ok());
        conn.close(4002, "idle");
        assert!(conn.cancel_token().is_cancelled());
    }

    #[test]
    fn parent_token_cancels_connection() {
        let parent = CancellationToken::new();
        let (conn, _rx) = make_connection("c1", "u1", 1);
        let conn = conn.with_cancel_token(parent.child_token());
        parent.cancel();
        assert!(conn.cancel_token().is_cancelled());
    }

    #[test]
    fn touch_counts_messages_and_resets_idle() {
        let (conn, _rx) = make_connection("c1", "u1", 1);
        let later = Instant::now() + Duration::from_secs(10);
        assert!(conn.idle_at(later) >= Duration::from_secs(10));
        conn.touch();
        conn.touch();
        assert_eq!(conn.message_count(), 2);
        assert!(conn.idle_at(Instant::now()) < Duration::from_secs(1));
    }

    #[test]
    fn heartbeat_flags() {
        let (conn, _rx) = make_connection("c1", "u1", 1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.last_pong_elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn identity_refresh() {
        let (conn, _rx) = make_connection("c1", "u1", 1);
        conn.set_identity(identity("u1", Role::Admin));
        assert!(conn.identity().role.is_admin());
        assert_eq!(conn.subject_id(), "u1");
        // Default source is fixed at handshake time.
        assert_eq!(conn.default_source(), "u1_c1");
    }
}

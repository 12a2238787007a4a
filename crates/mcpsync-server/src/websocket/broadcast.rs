//! Full-state fan-out to connected clients.

use std::sync::Arc;

use mcpsync_context::ContextStore;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::connection::SendFailure;
use super::registry::ConnectionRegistry;
use crate::metrics::{BROADCAST_DROPS_TOTAL, BROADCASTS_TOTAL, CONTEXT_ENTRIES};
use crate::protocol::{OutboundType, ServerMessage};

/// Delivery counts for one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub recipients: usize,
    /// Frames queued.
    pub delivered: usize,
    /// Frames dropped on a full queue; the connection stays registered.
    pub dropped: usize,
    /// Connections unregistered because their writer was gone.
    pub removed: usize,
}

/// Pushes context state to every registered connection.
pub struct BroadcastCoordinator {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastCoordinator {
    /// Coordinator over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize the whole store once and queue the same frame for every
    /// connection. A dead recipient is unregistered; the others still get
    /// the frame.
    pub fn broadcast_full_state(&self, context: &Mutex<ContextStore>) -> BroadcastReport {
        let snapshot = context.lock().snapshot();
        gauge!(CONTEXT_ENTRIES).set(snapshot.entry_count as f64);
        let frame = ServerMessage::new(OutboundType::ContextUpdate, &snapshot).to_frame();

        let recipients = self.registry.all();
        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..BroadcastReport::default()
        };

        for conn in &recipients {
            match conn.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(SendFailure::Full) => {
                    report.dropped += 1;
                    counter!(BROADCAST_DROPS_TOTAL).increment(1);
                    warn!(connection_id = %conn.id, "send queue full, broadcast dropped");
                }
                Err(SendFailure::Closed) => {
                    if self.registry.unregister_connection(conn) {
                        report.removed += 1;
                    }
                    debug!(connection_id = %conn.id, "recipient gone, unregistered");
                }
            }
        }

        counter!(BROADCASTS_TOTAL).increment(1);
        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            removed = report.removed,
            entries = snapshot.entry_count,
            "context state broadcast"
        );
        report
    }

    /// Queue `message` for one connection. Returns `false` on any failure and
    /// leaves cleanup to the session or the sweep.
    pub fn send_to_one(&self, connection_id: &str, message: &ServerMessage) -> bool {
        match self.registry.get(connection_id) {
            Some(conn) => conn.send_message(message),
            None => false,
        }
    }
}

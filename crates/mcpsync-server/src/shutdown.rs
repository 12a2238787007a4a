//! Graceful shutdown: one `CancellationToken` stops the accept loop, the
//! sweep and every session; tracked tasks are then drained with a deadline.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits by default.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the server-wide shutdown token.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default drain timeout.
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Coordinator that waits at most `drain_timeout` for tasks.
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the server but cancellable on its own, for
    /// per-connection tasks.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait for `handles` up to the drain timeout. Tasks still
    /// running afterwards are aborted. Returns whether every task finished.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>) -> bool {
        self.shutdown();
        info!(
            tasks = handles.len(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "draining server tasks"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let finished = tokio::time::timeout(self.drain_timeout, futures::future::join_all(handles))
            .await
            .is_ok();
        if !finished {
            warn!(timeout = ?self.drain_timeout, "drain timed out, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
        }
        finished
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

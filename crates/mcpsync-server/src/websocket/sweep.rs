//! Periodic staleness sweep.

use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::STALE_CONNECTIONS_SWEPT_TOTAL;
use crate::protocol::CLOSE_IDLE_TIMEOUT;
use crate::server::ServerState;

/// Spawn the sweep: every `sweep_interval`, close connections idle longer
/// than `connection_timeout` with 4002. Stops when `cancel` fires.
pub fn start_sweep_task(state: Arc<ServerState>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = sweep_once(&state);
                }
            }
        }
        debug!("sweep task stopped");
    })
}

/// Unregister and close every stale connection. Returns how many were closed.
pub fn sweep_once(state: &ServerState) -> usize {
    let stale = state.registry.sweep(state.config.connection_timeout);
    for conn in &stale {
        info!(
            connection_id = %conn.id,
            subject_id = %conn.subject_id(),
            idle_timeout = ?state.config.connection_timeout,
            "closing idle connection"
        );
        conn.close(CLOSE_IDLE_TIMEOUT, "connection idle timeout");
    }
    if !stale.is_empty() {
        counter!(STALE_CONNECTIONS_SWEPT_TOTAL).increment(stale.len() as u64);
    }
    stale.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::websocket::connection::tests::identity;
    use crate::websocket::{Connection, ConnectionState, Outbound};
    use mcpsync_auth::{Algorithm, AuthValidator, Role};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn state(connection_timeout: Duration, sweep_interval: Duration) -> Arc<ServerState> {
        let config = ServerConfig {
            connection_timeout,
            sweep_interval,
            ..ServerConfig::default()
        };
        let validator = AuthValidator::new(b"sweep-test-secret", Algorithm::HS256).unwrap();
        Arc::new(ServerState::new(config, validator, None))
    }

    fn register(state: &ServerState, id: &str) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(id.into(), identity("u1", Role::Student), tx));
        let _ = conn.advance(ConnectionState::Active);
        let _ = state.registry.register(conn.clone());
        (conn, rx)
    }

    #[tokio::test]
    async fn idle_connections_get_4002() {
        let state = state(Duration::from_millis(20), Duration::from_secs(60));
        let (idle, mut rx) = register(&state, "idle");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let (_fresh, _rx_fresh) = register(&state, "fresh");

        assert_eq!(sweep_once(&state), 1);
        assert_eq!(state.registry.len(), 1);
        assert!(state.registry.get("fresh").is_some());
        assert_eq!(idle.state(), ConnectionState::Closing);
        match rx.recv().await.unwrap() {
            Outbound::Close { code, .. } => assert_eq!(code, CLOSE_IDLE_TIMEOUT),
            Outbound::Text(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn nothing_to_sweep() {
        let state = state(Duration::from_secs(3600), Duration::from_secs(60));
        let (_conn, _rx) = register(&state, "c1");
        assert_eq!(sweep_once(&state), 0);
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn task_sweeps_periodically_and_stops_on_cancel() {
        let state = state(Duration::from_millis(10), Duration::from_millis(20));
        let (_conn, _rx) = register(&state, "c1");
        let cancel = CancellationToken::new();
        let task = start_sweep_task(state.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(state.registry.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}

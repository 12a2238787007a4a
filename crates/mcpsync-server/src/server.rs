//! `SyncServer`: axum router, listener and the state shared by every
//! connection task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use mcpsync_auth::{AuthValidator, Handshake};
use mcpsync_context::ContextStore;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::protocol::CLOSE_GOING_AWAY;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_session;
use crate::websocket::sweep::start_sweep_task;
use crate::websocket::{BroadcastCoordinator, ConnectionRegistry};

/// State owned by one server instance and shared with every connection
/// task. The context store and the registry each sit behind their own lock.
pub struct ServerState {
    /// Runtime configuration.
    pub config: ServerConfig,
    /// Token validator.
    pub validator: AuthValidator,
    /// Active connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out over `registry`.
    pub broadcaster: BroadcastCoordinator,
    /// Shared context.
    pub context: Mutex<ContextStore>,
    /// Shutdown token owner.
    pub shutdown: ShutdownCoordinator,
    /// When the server was created.
    pub start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Fresh state with an empty context and registry.
    pub fn new(
        config: ServerConfig,
        validator: AuthValidator,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            context: Mutex::new(ContextStore::new(config.max_budget)),
            broadcaster: BroadcastCoordinator::new(registry.clone()),
            registry,
            validator,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics,
            config,
        }
    }

    fn health_counters(&self) -> HealthCounters {
        let context = self.context.lock();
        HealthCounters {
            connections: self.registry.len(),
            context_entries: context.len(),
            total_cost: context.total_cost(),
            max_budget: context.max_budget(),
        }
    }
}

/// The context synchronization server.
pub struct SyncServer {
    state: Arc<ServerState>,
}

impl SyncServer {
    /// Server without a metrics endpoint.
    pub fn new(config: ServerConfig, validator: AuthValidator) -> Self {
        Self {
            state: Arc::new(ServerState::new(config, validator, None)),
        }
    }

    /// Server whose `/metrics` renders `handle`.
    pub fn with_metrics(config: ServerConfig, validator: AuthValidator, handle: PrometheusHandle) -> Self {
        Self {
            state: Arc::new(ServerState::new(config, validator, Some(handle))),
        }
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Router with `/ws`, `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind, then serve and sweep in background tasks until shutdown.
    pub async fn listen(self) -> std::io::Result<ServerHandle> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, max_budget = self.state.config.max_budget, "context sync server listening");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let stop = self.state.shutdown.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                error!(error = %e, "server terminated with error");
            }
        });
        let sweep = start_sweep_task(self.state.clone(), self.state.shutdown.token());

        Ok(ServerHandle {
            addr: local_addr,
            state: self.state,
            tasks: vec![server, sweep],
        })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    state: Arc<ServerState>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Close every connection with 1001, stop accepting and sweeping, and
    /// wait for the background tasks. Returns whether they all finished in
    /// time.
    pub async fn shutdown(self) -> bool {
        let connections = self.state.registry.all();
        info!(connections = connections.len(), "shutting down");
        for conn in &connections {
            conn.close(CLOSE_GOING_AWAY, "server shutting down");
        }
        self.state.shutdown.drain(self.tasks).await
    }
}

/// GET /ws. Authentication runs after the upgrade so failures can carry a
/// close code.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let handshake = Handshake::new(query, headers);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_session(socket, peer, handshake, state))
}

/// GET /health
async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.health_counters(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mcpsync_auth::Algorithm;
    use mcpsync_context::Actor;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn make_server() -> SyncServer {
        let validator = AuthValidator::new(b"server-test-secret", Algorithm::HS256).unwrap();
        SyncServer::new(ServerConfig::default(), validator)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_context_counters() {
        let server = make_server();
        let _ = server
            .state()
            .context
            .lock()
            .insert(&Actor::subject("u1"), "u1_c", json!("abcdefgh"), 1)
            .unwrap();

        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["contextEntries"], 1);
        assert_eq!(body["totalCost"], 2);
        assert_eq!(body["maxBudget"], 100_000);
    }

    #[tokio::test]
    async fn health_after_shutdown_signal() {
        let server = make_server();
        server.state().shutdown.shutdown();
        let (_, body) = get_json(server.router(), "/health").await;
        assert_eq!(body["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_unavailable_without_recorder() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/ws").await;
        assert!(status.is_client_error() || status.is_server_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_and_shuts_down() {
        let handle = make_server().listen().await.unwrap();
        assert_ne!(handle.addr().port(), 0);
        assert!(handle.shutdown().await);
    }
}

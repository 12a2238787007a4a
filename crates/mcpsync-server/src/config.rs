//! Server configuration.

use std::time::Duration;

use mcpsync_settings::SyncSettings;

/// Runtime configuration for [`SyncServer`](crate::SyncServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Drop clients that have not answered a ping for this long.
    pub pong_timeout: Duration,
    /// Idle time after which the sweep closes a connection.
    pub connection_timeout: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
    /// Context store budget.
    pub max_budget: u64,
    /// Let admins modify sources owned by other subjects.
    pub admin_override: bool,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            send_queue_capacity: server.send_queue_capacity,
            max_message_size: server.max_message_size,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
            pong_timeout: Duration::from_secs(server.pong_timeout_secs),
            connection_timeout: Duration::from_secs(server.connection_timeout_secs),
            sweep_interval: Duration::from_secs(server.sweep_interval_secs),
            max_budget: settings.context.max_budget,
            admin_override: settings.context.admin_override,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            send_queue_capacity: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(90),
            connection_timeout: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            max_budget: 100_000,
            admin_override: false,
        }
    }
}

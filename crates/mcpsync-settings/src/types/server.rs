//! Network and connection lifecycle settings.

use serde::{Deserialize, Serialize};

/// WebSocket server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before sends are dropped.
    pub send_queue_capacity: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server-initiated Ping frames.
    pub heartbeat_interval_secs: u64,
    /// How long a client may ignore pings before it is dropped.
    pub pong_timeout_secs: u64,
    /// Idle time (no inbound messages) after which the sweep closes a connection.
    pub connection_timeout_secs: u64,
    /// How often the staleness sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_connections: 256,
            send_queue_capacity: 256,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 90,
            connection_timeout_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

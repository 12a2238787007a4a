//! Settings types.
//!
//! All sections use `camelCase` on disk and `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

mod auth;
mod server;
mod storage;

pub use auth::{AuthSettings, SUPPORTED_JWT_ALGORITHMS};
pub use server::ServerSettings;
pub use storage::{ContextSettings, MemorySettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Network and connection lifecycle settings.
    pub server: ServerSettings,
    /// Bearer token verification.
    pub auth: AuthSettings,
    /// Shared context store.
    pub context: ContextSettings,
    /// Long-term memory store.
    pub memory: MemorySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SyncSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_connections == 0 {
            return Err(invalid("server.maxConnections must be > 0"));
        }
        if s.send_queue_capacity == 0 {
            return Err(invalid("server.sendQueueCapacity must be > 0"));
        }
        if s.max_message_size == 0 {
            return Err(invalid("server.maxMessageSize must be > 0"));
        }
        if s.heartbeat_interval_secs == 0 {
            return Err(invalid("server.heartbeatIntervalSecs must be > 0"));
        }
        if s.connection_timeout_secs == 0 {
            return Err(invalid("server.connectionTimeoutSecs must be > 0"));
        }
        if s.sweep_interval_secs == 0 {
            return Err(invalid("server.sweepIntervalSecs must be > 0"));
        }
        if !SUPPORTED_JWT_ALGORITHMS.contains(&self.auth.jwt_algorithm.as_str()) {
            return Err(invalid(format!(
                "auth.jwtAlgorithm {} is not one of {SUPPORTED_JWT_ALGORITHMS:?}",
                self.auth.jwt_algorithm
            )));
        }
        if self.auth.jwt_secret.as_deref() == Some("") {
            return Err(invalid("auth.jwtSecret must not be empty"));
        }
        if self.context.max_budget == 0 {
            return Err(invalid("context.maxBudget must be > 0"));
        }
        if self.memory.max_records == 0 {
            return Err(invalid("memory.maxRecords must be > 0"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(message.into())
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive. `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

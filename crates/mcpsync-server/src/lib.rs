//! # mcpsync-server
//!
//! Axum WebSocket server that keeps a token-budgeted shared context in sync
//! across authenticated clients.
//!
//! - [`server`]: router (`/ws`, `/health`, `/metrics`), listener, shared state
//! - [`websocket`]: per-connection session, registry, broadcast, dispatch,
//!   staleness sweep
//! - [`protocol`]: wire message types and protocol errors
//! - [`config`], [`health`], [`metrics`], [`shutdown`]: ambient plumbing

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{ServerHandle, ServerState, SyncServer};
pub use shutdown::ShutdownCoordinator;

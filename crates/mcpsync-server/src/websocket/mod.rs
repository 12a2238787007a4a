//! WebSocket connection handling.

pub mod broadcast;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod session;
pub mod sweep;

pub use broadcast::{BroadcastCoordinator, BroadcastReport};
pub use connection::{Connection, ConnectionState, Outbound, SendFailure};
pub use dispatch::{DispatchOutcome, dispatch};
pub use registry::ConnectionRegistry;
pub use session::run_session;
pub use sweep::{start_sweep_task, sweep_once};

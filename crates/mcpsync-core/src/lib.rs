//! # mcpsync-core
//!
//! Small shared pieces used by every other crate in the workspace:
//!
//! - [`logging`]: `tracing` subscriber setup (compact or JSON to stderr)
//! - [`time`]: wire timestamp formatting

#![deny(unsafe_code)]

pub mod logging;
pub mod time;

pub use logging::init_subscriber;
pub use time::{now_rfc3339, to_rfc3339};

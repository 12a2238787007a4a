//! # mcpsync-memory
//!
//! Long-term memory: content-addressed records persisted in SQLite, scored
//! by importance, reinforced on every read and consolidated down to a fixed
//! capacity. Independent of the WebSocket server.

#![deny(unsafe_code)]

pub mod database;
pub mod errors;
pub mod record;
pub mod schema;
pub mod similarity;
pub mod store;

pub use database::Database;
pub use errors::MemoryError;
pub use record::{MemoryRecord, content_id, initial_importance};
pub use similarity::cosine_similarity;
pub use store::{EXPORT_VERSION, MemoryExport, MemoryStats, MemoryStore};

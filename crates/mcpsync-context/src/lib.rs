//! # mcpsync-context
//!
//! Short-term shared context: entries written by connected agents, each with
//! an estimated token cost, a priority and an owning subject. The store keeps
//! the total cost within a budget by greedy pruning after every mutation.
//!
//! The store is a plain owned struct. The server holds it behind a lock and
//! is the only writer.

#![deny(unsafe_code)]

pub mod entry;
pub mod errors;
pub mod estimator;
pub mod prune;
pub mod store;

pub use entry::{ContextEntry, ContextFilter, ContextSnapshot, DEFAULT_PRIORITY};
pub use errors::ContextError;
pub use estimator::{SerializedLengthEstimator, TokenEstimator};
pub use store::{Actor, ContextStore, InsertOutcome};

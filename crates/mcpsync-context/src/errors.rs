//! Context store errors.

/// Errors returned by [`ContextStore`](crate::ContextStore) mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContextError {
    /// The source is owned by another subject.
    #[error("subject {actor} may not modify source {source_id}")]
    Forbidden {
        /// Target source.
        source_id: String,
        /// Subject attempting the change.
        actor: String,
    },

    /// No entry under this key.
    #[error("no context entry with key {0}")]
    NotFound(String),
}

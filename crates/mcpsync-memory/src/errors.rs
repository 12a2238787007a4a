//! Memory store errors.

/// Errors from the memory store and its database.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// SQLite failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(String),

    /// A stored column could not be decoded.
    #[error("corrupt row in {column}: {detail}")]
    CorruptRow {
        /// Column name.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },

    /// Export document from an unknown format version.
    #[error("unsupported export version {0}")]
    UnsupportedExport(u32),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

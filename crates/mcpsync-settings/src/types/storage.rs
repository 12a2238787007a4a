//! Context store and memory store settings.

use serde::{Deserialize, Serialize};

/// Shared context store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Maximum total estimated cost the store may hold after pruning.
    pub max_budget: u64,
    /// Let `admin` identities modify sources owned by other subjects.
    pub admin_override: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_budget: 100_000,
            admin_override: false,
        }
    }
}

/// Long-term memory store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// `SQLite` database path. Relative paths resolve under `~/.mcpsync`.
    pub db_path: String,
    /// Record count above which consolidation evicts.
    pub max_records: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            db_path: "memory.db".to_string(),
            max_records: 10_000,
        }
    }
}

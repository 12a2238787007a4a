//! Context entry and snapshot types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority given to entries written without one.
pub const DEFAULT_PRIORITY: i64 = 1;

/// One unit of shared short-term state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    /// `{source}_{timestamp_micros}`, suffixed on collision.
    pub key: String,
    /// Write time.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON written by the client.
    pub payload: Value,
    /// Estimated token cost.
    pub cost: u64,
    /// Logical stream the entry belongs to.
    pub source: String,
    /// Subject that owns `source`.
    pub owner: String,
    /// Higher survives pruning longer.
    pub priority: i64,
    /// Insertion order, last tie-break in pruning.
    #[serde(skip)]
    pub seq: u64,
}

/// Optional filters for [`ContextStore::query`](crate::ContextStore::query).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFilter {
    /// Exact source match.
    #[serde(default)]
    pub source: Option<String>,
    /// Minimum priority, inclusive.
    #[serde(default, alias = "min_priority")]
    pub min_priority: Option<i64>,
}

impl ContextFilter {
    /// Whether `entry` passes every filter that is set.
    pub fn matches(&self, entry: &ContextEntry) -> bool {
        self.source.as_ref().is_none_or(|s| *s == entry.source)
            && self.min_priority.is_none_or(|p| entry.priority >= p)
    }
}

/// Full store state as broadcast to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// Entries by key.
    pub entries: BTreeMap<String, ContextEntry>,
    /// Sum of entry costs.
    pub total_cost: u64,
    /// Configured budget.
    pub max_budget: u64,
    /// Number of entries.
    pub entry_count: usize,
}

//! Memory records and importance scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Importance of a record with no bonuses.
pub const BASE_IMPORTANCE: f64 = 1.0;
/// Upper bound on importance.
pub const IMPORTANCE_CAP: f64 = 5.0;
/// Multiplier applied to importance on every access.
pub const ACCESS_REINFORCEMENT: f64 = 1.1;

const FLAG_BONUSES: &[(&str, f64)] = &[
    ("is_user_feedback", 0.5),
    ("is_error", 0.3),
    ("is_success", 0.2),
];
const USER_SOURCE_BONUS: f64 = 0.4;
const LONG_CONTENT_CHARS: usize = 1000;
const LONG_CONTENT_BONUS: f64 = 0.4;
const MEDIUM_CONTENT_CHARS: usize = 500;
const MEDIUM_CONTENT_BONUS: f64 = 0.2;

/// A durable unit of long-term recall.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Hex SHA-256 of `content`.
    pub id: String,
    /// Remembered text.
    pub content: String,
    /// Optional embedding for similarity search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// First store time.
    pub created_at: DateTime<Utc>,
    /// Number of reads.
    #[serde(default)]
    pub access_count: u64,
    /// Last read time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Importance score in `[0, IMPORTANCE_CAP]`.
    pub importance: f64,
}

impl MemoryRecord {
    /// Weight used by consolidation; the lowest weights are removed first.
    pub fn retention_weight(&self) -> f64 {
        self.importance * (self.access_count as f64 + 1.0)
    }
}

/// Content-addressed id.
pub fn content_id(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Importance assigned when a record is first stored.
pub fn initial_importance(content: &str, metadata: &Map<String, Value>) -> f64 {
    let mut score = BASE_IMPORTANCE;

    for (flag, bonus) in FLAG_BONUSES {
        if metadata.get(*flag).and_then(Value::as_bool) == Some(true) {
            score += bonus;
        }
    }
    if metadata.get("source").and_then(Value::as_str) == Some("user") {
        score += USER_SOURCE_BONUS;
    }

    let chars = content.chars().count();
    if chars > LONG_CONTENT_CHARS {
        score += LONG_CONTENT_BONUS;
    } else if chars > MEDIUM_CONTENT_CHARS {
        score += MEDIUM_CONTENT_BONUS;
    }

    score.min(IMPORTANCE_CAP)
}

/// Importance after one more access.
pub fn reinforced(importance: f64) -> f64 {
    (importance * ACCESS_REINFORCEMENT).min(IMPORTANCE_CAP)
}

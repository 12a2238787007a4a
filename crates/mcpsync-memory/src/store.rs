//! The memory store.
//!
//! Records are addressed by a hash of their content, so storing the same
//! text twice reinforces the existing record instead of duplicating it.
//! Every read (`retrieve`, `search_similar` hits) bumps the access counter
//! and multiplies importance by [`ACCESS_REINFORCEMENT`], capped at
//! [`IMPORTANCE_CAP`].
//!
//! Once the record count exceeds `max_records`, consolidation deletes the
//! records with the lowest `importance * (access_count + 1)`, oldest first on
//! ties, until the store is back at capacity.

use std::path::Path;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use mcpsync_settings::MemorySettings;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::database::Database;
use crate::errors::MemoryError;
use crate::record::{
    ACCESS_REINFORCEMENT, IMPORTANCE_CAP, MemoryRecord, content_id, initial_importance, reinforced,
};
use crate::similarity::cosine_similarity;

/// Format version written by [`MemoryStore::export`].
pub const EXPORT_VERSION: u32 = 1;

const RECENT_WINDOW_HOURS: i64 = 24;

const SELECT_COLUMNS: &str = "SELECT id, content, embedding, metadata, created_at, access_count, \
     last_accessed_at, importance FROM memories";

/// Bulk export document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryExport {
    /// Format version.
    pub version: u32,
    /// Export time.
    pub exported_at: DateTime<Utc>,
    /// Every record.
    pub records: Vec<MemoryRecord>,
}

/// Aggregate bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Records stored.
    pub total_records: u64,
    /// Capacity.
    pub max_records: u64,
    /// Mean access count, 0 when empty.
    pub avg_access_count: f64,
    /// Mean importance, 0 when empty.
    pub avg_importance: f64,
    /// Records read in the last 24 hours.
    pub recently_accessed: u64,
}

/// Durable memory store.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    db: Database,
    max_records: u64,
}

impl MemoryStore {
    /// Wrap an open database.
    pub fn new(db: Database, max_records: u64) -> Self {
        Self { db, max_records }
    }

    /// Open the database file at `path`.
    pub fn open(path: &Path, max_records: u64) -> Result<Self, MemoryError> {
        Ok(Self::new(Database::open(path)?, max_records))
    }

    /// Open the store described by `settings`, with `db_path` already resolved.
    pub fn from_settings(settings: &MemorySettings, db_path: &Path) -> Result<Self, MemoryError> {
        Self::open(db_path, settings.max_records as u64)
    }

    /// In-memory store (for testing).
    pub fn in_memory(max_records: u64) -> Result<Self, MemoryError> {
        Ok(Self::new(Database::in_memory()?, max_records))
    }

    /// Capacity.
    pub fn max_records(&self) -> u64 {
        self.max_records
    }

    /// Store `content`, or reinforce it if already present. Returns its id.
    pub fn store(
        &self,
        content: &str,
        metadata: Map<String, Value>,
        embedding: Option<Vec<f32>>,
    ) -> Result<String, MemoryError> {
        self.store_at(content, metadata, embedding, Utc::now())
    }

    fn store_at(
        &self,
        content: &str,
        metadata: Map<String, Value>,
        embedding: Option<Vec<f32>>,
        now: DateTime<Utc>,
    ) -> Result<String, MemoryError> {
        let id = content_id(content);

        if touch(&self.db, &id, now)? {
            debug!(%id, "memory already stored, reinforced");
            return Ok(id);
        }

        let importance = initial_importance(content, &metadata);
        let embedding_json = embedding.as_ref().map(serde_json::to_string).transpose()?;
        let metadata_json = serde_json::to_string(&metadata)?;

        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO memories (id, content, embedding, metadata, created_at, access_count, last_accessed_at, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6)",
                params![id, content, embedding_json, metadata_json, timestamp(now), importance],
            )?;
            Ok(())
        })?;
        debug!(%id, importance, "memory stored");

        let _ = self.consolidate()?;
        Ok(id)
    }

    /// Read a record, counting the read.
    pub fn retrieve(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        if !touch(&self.db, id, Utc::now())? {
            return Ok(None);
        }
        self.peek(id)
    }

    /// Read a record without counting the read.
    pub fn peek(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let raw = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], RawRecord::from_row)
                .optional()?)
        })?;
        raw.map(RawRecord::decode).transpose()
    }

    /// Records whose embedding has cosine similarity `>= threshold` with
    /// `query`, best first, at most `limit`. Every hit counts as a read.
    pub fn search_similar(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(MemoryRecord, f32)>, MemoryError> {
        let candidates = self.load(&format!("{SELECT_COLUMNS} WHERE embedding IS NOT NULL"))?;

        let mut scored: Vec<(MemoryRecord, f32)> = candidates
            .into_iter()
            .filter_map(|record| {
                let score = cosine_similarity(query, record.embedding.as_deref()?);
                (score >= threshold).then_some((record, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.truncate(limit);

        let now = Utc::now();
        for (record, _) in &mut scored {
            let _ = touch(&self.db, &record.id, now)?;
            record.access_count += 1;
            record.last_accessed_at = Some(now);
            record.importance = reinforced(record.importance);
        }
        Ok(scored)
    }

    /// Records whose metadata contains every key of `filters` with an equal
    /// value. Newest first.
    pub fn search_by_metadata(
        &self,
        filters: &Map<String, Value>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.load(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id ASC"))?;
        Ok(records
            .into_iter()
            .filter(|r| filters.iter().all(|(k, v)| r.metadata.get(k) == Some(v)))
            .collect())
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        self.db.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
            Ok(rows > 0)
        })
    }

    /// Number of records.
    pub fn count(&self) -> Result<u64, MemoryError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Delete the least valuable records until at most `max_records` remain.
    /// Returns how many were removed.
    pub fn consolidate(&self) -> Result<usize, MemoryError> {
        let count = self.count()?;
        if count <= self.max_records {
            return Ok(0);
        }
        let excess = (count - self.max_records) as i64;

        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM memories WHERE id IN (
                     SELECT id FROM memories
                     ORDER BY importance * (access_count + 1) ASC, created_at ASC, id ASC
                     LIMIT ?1
                 )",
                [excess],
            )?)
        })?;
        info!(removed, max_records = self.max_records, "memory consolidated");
        Ok(removed)
    }

    /// Every record, oldest first.
    pub fn export(&self) -> Result<MemoryExport, MemoryError> {
        Ok(MemoryExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            records: self.load(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC, id ASC"))?,
        })
    }

    /// Upsert every record of `export`, then consolidate. Returns the number
    /// of records written.
    pub fn import(&self, export: &MemoryExport) -> Result<usize, MemoryError> {
        if export.version != EXPORT_VERSION {
            return Err(MemoryError::UnsupportedExport(export.version));
        }

        let written = self.db.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO memories (id, content, embedding, metadata, created_at, access_count, last_accessed_at, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     content = excluded.content,
                     embedding = excluded.embedding,
                     metadata = excluded.metadata,
                     created_at = excluded.created_at,
                     access_count = excluded.access_count,
                     last_accessed_at = excluded.last_accessed_at,
                     importance = excluded.importance",
            )?;
            for record in &export.records {
                let embedding = record.embedding.as_ref().map(serde_json::to_string).transpose()?;
                let _ = stmt.execute(params![
                    record.id,
                    record.content,
                    embedding,
                    serde_json::to_string(&record.metadata)?,
                    timestamp(record.created_at),
                    record.access_count as i64,
                    record.last_accessed_at.map(timestamp),
                    record.importance.clamp(0.0, IMPORTANCE_CAP),
                ])?;
            }
            Ok(export.records.len())
        })?;
        info!(written, "memory import applied");

        let _ = self.consolidate()?;
        Ok(written)
    }

    /// Aggregate statistics.
    pub fn statistics(&self) -> Result<MemoryStats, MemoryError> {
        let since = timestamp(Utc::now() - Duration::hours(RECENT_WINDOW_HOURS));
        self.db.with_conn(|conn| {
            let (total, avg_access, avg_importance): (i64, Option<f64>, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(*), AVG(access_count), AVG(importance) FROM memories",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
            let recent: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE last_accessed_at >= ?1",
                [since],
                |row| row.get(0),
            )?;
            Ok(MemoryStats {
                total_records: total as u64,
                max_records: self.max_records,
                avg_access_count: avg_access.unwrap_or(0.0),
                avg_importance: avg_importance.unwrap_or(0.0),
                recently_accessed: recent as u64,
            })
        })
    }

    fn load(&self, sql: &str) -> Result<Vec<MemoryRecord>, MemoryError> {
        let raws = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([], RawRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        raws.into_iter().map(RawRecord::decode).collect()
    }
}

/// Count one access. Returns whether the record exists.
fn touch(db: &Database, id: &str, now: DateTime<Utc>) -> Result<bool, MemoryError> {
    db.with_conn(|conn| {
        let rows = conn.execute(
            "UPDATE memories
             SET access_count = access_count + 1,
                 last_accessed_at = ?2,
                 importance = MIN(importance * ?3, ?4)
             WHERE id = ?1",
            params![id, timestamp(now), ACCESS_REINFORCEMENT, IMPORTANCE_CAP],
        )?;
        Ok(rows > 0)
    })
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: &'static str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::CorruptRow {
            column,
            detail: e.to_string(),
        })
}

struct RawRecord {
    id: String,
    content: String,
    embedding: Option<String>,
    metadata: String,
    created_at: String,
    access_count: i64,
    last_accessed_at: Option<String>,
    importance: f64,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            embedding: row.get(2)?,
            metadata: row.get(3)?,
            created_at: row.get(4)?,
            access_count: row.get(5)?,
            last_accessed_at: row.get(6)?,
            importance: row.get(7)?,
        })
    }

    fn decode(self) -> Result<MemoryRecord, MemoryError> {
        let embedding = self
            .embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()
            .map_err(|e| MemoryError::CorruptRow {
                column: "embedding",
                detail: e.to_string(),
            })?;
        let metadata = serde_json::from_str::<Map<String, Value>>(&self.metadata).map_err(|e| {
            MemoryError::CorruptRow {
                column: "metadata",
                detail: e.to_string(),
            }
        })?;
        Ok(MemoryRecord {
            id: self.id,
            content: self.content,
            embedding,
            metadata,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            access_count: self.access_count.max(0) as u64,
            last_accessed_at: self
                .last_accessed_at
                .as_deref()
                .map(|raw| parse_timestamp(raw, "last_accessed_at"))
                .transpose()?,
            importance: self.importance,
        })
    }
}

//! The context store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::entry::{ContextEntry, ContextFilter, ContextSnapshot};
use crate::errors::ContextError;
use crate::estimator::{SerializedLengthEstimator, TokenEstimator};
use crate::prune::select_evictions;

/// Who is asking for a mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    /// Authenticated subject.
    pub subject_id: String,
    /// May modify sources owned by other subjects.
    pub may_override: bool,
}

impl Actor {
    /// An actor without override rights.
    pub fn subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            may_override: false,
        }
    }
}

/// Result of a successful insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Key of the new entry.
    pub key: String,
    /// Its estimated cost.
    pub cost: u64,
    /// Keys evicted by the pruning pass that followed. May include `key`.
    pub evicted: Vec<String>,
}

/// Owner and live entry count of a source.
#[derive(Clone, Debug)]
struct SourceOwner {
    subject_id: String,
    entries: usize,
}

/// Budgeted entry store with per-source ownership.
///
/// A subject may modify sources named `"{subject_id}_..."`. Once a source
/// holds entries, the subject that created them is its recorded owner and is
/// the only one (besides an actor with `may_override`) allowed to write to,
/// clear or re-prioritise it. The record is dropped with the source's last
/// entry.
pub struct ContextStore {
    entries: HashMap<String, ContextEntry>,
    owners: HashMap<String, SourceOwner>,
    estimator: Box<dyn TokenEstimator>,
    max_budget: u64,
    total_cost: u64,
    next_seq: u64,
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("entries", &self.entries.len())
            .field("sources", &self.owners.len())
            .field("total_cost", &self.total_cost)
            .field("max_budget", &self.max_budget)
            .finish_non_exhaustive()
    }
}

impl ContextStore {
    /// Store with the default estimator.
    pub fn new(max_budget: u64) -> Self {
        Self::with_estimator(max_budget, Box::new(SerializedLengthEstimator))
    }

    /// Store with a custom estimator.
    pub fn with_estimator(max_budget: u64, estimator: Box<dyn TokenEstimator>) -> Self {
        Self {
            entries: HashMap::new(),
            owners: HashMap::new(),
            estimator,
            max_budget,
            total_cost: 0,
            next_seq: 0,
        }
    }

    /// Recorded owner of `source`, while it holds entries.
    pub fn owner_of(&self, source: &str) -> Option<&str> {
        self.owners.get(source).map(|o| o.subject_id.as_str())
    }

    /// Number of sources currently holding entries.
    pub fn source_count(&self) -> usize {
        self.owners.len()
    }

    /// Insert `payload` under `source`, then prune.
    pub fn insert(
        &mut self,
        actor: &Actor,
        source: &str,
        payload: Value,
        priority: i64,
    ) -> Result<InsertOutcome, ContextError> {
        self.insert_at(actor, source, payload, priority, Utc::now())
    }

    /// [`insert`](Self::insert) with an explicit write time.
    pub fn insert_at(
        &mut self,
        actor: &Actor,
        source: &str,
        payload: Value,
        priority: i64,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, ContextError> {
        self.authorize(actor, source)?;
        let record = self
            .owners
            .entry(source.to_owned())
            .or_insert_with(|| SourceOwner {
                subject_id: actor.subject_id.clone(),
                entries: 0,
            });
        record.entries += 1;
        let owner = record.subject_id.clone();

        let key = self.unique_key(source, now);
        let cost = self.estimator.estimate(&payload);
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = ContextEntry {
            key: key.clone(),
            timestamp: now,
            payload,
            cost,
            source: source.to_owned(),
            owner,
            priority,
            seq,
        };
        self.total_cost = self.total_cost.saturating_add(cost);
        let _ = self.entries.insert(key.clone(), entry);

        let evicted = self.prune();
        debug!(%key, cost, evicted = evicted.len(), "context entry inserted");
        Ok(InsertOutcome { key, cost, evicted })
    }

    /// Remove every entry of `source`. Returns how many were removed.
    pub fn clear(&mut self, actor: &Actor, source: &str) -> Result<usize, ContextError> {
        self.authorize(actor, source)?;

        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.source == source)
            .map(|e| e.key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        debug!(source, removed = keys.len(), "context source cleared");
        Ok(keys.len())
    }

    /// Entries passing `filter`, ordered by key.
    pub fn query(&self, filter: &ContextFilter) -> BTreeMap<String, ContextEntry> {
        self.entries
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| (e.key.clone(), e.clone()))
            .collect()
    }

    /// Entry under `key`.
    pub fn get(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// Change an entry's priority, then prune. Returns evicted keys.
    pub fn set_priority(
        &mut self,
        actor: &Actor,
        key: &str,
        priority: i64,
    ) -> Result<Vec<String>, ContextError> {
        let source = self
            .entries
            .get(key)
            .map(|e| e.source.clone())
            .ok_or_else(|| ContextError::NotFound(key.to_owned()))?;
        self.authorize(actor, &source)?;

        if let Some(entry) = self.entries.get_mut(key) {
            entry.priority = priority;
        }
        Ok(self.prune())
    }

    /// Restore the budget. Returns evicted keys in eviction order.
    pub fn prune(&mut self) -> Vec<String> {
        let evicted = select_evictions(self.entries.values(), self.max_budget);
        for key in &evicted {
            self.remove(key);
        }
        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                total_cost = self.total_cost,
                max_budget = self.max_budget,
                "context pruned"
            );
        }
        evicted
    }

    /// Copy of the full state.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            entries: self.query(&ContextFilter::default()),
            total_cost: self.total_cost,
            max_budget: self.max_budget,
            entry_count: self.entries.len(),
        }
    }

    /// Sum of entry costs.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    /// Configured budget.
    pub fn max_budget(&self) -> u64 {
        self.max_budget
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn authorize(&self, actor: &Actor, source: &str) -> Result<(), ContextError> {
        if actor.may_override {
            return Ok(());
        }
        let allowed = match self.owners.get(source) {
            Some(owner) => owner.subject_id == actor.subject_id,
            None => source
                .strip_prefix(actor.subject_id.as_str())
                .is_some_and(|rest| rest.starts_with('_')),
        };
        if allowed {
            Ok(())
        } else {
            Err(ContextError::Forbidden {
                source_id: source.to_owned(),
                actor: actor.subject_id.clone(),
            })
        }
    }

    fn unique_key(&self, source: &str, now: DateTime<Utc>) -> String {
        let base = format!("{source}_{}", now.timestamp_micros());
        if !self.entries.contains_key(&base) {
            return base;
        }
        let mut n = 1u64;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.entries.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn remove(&mut self, key: &str) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        self.total_cost = self.total_cost.saturating_sub(entry.cost);
        if let Some(owner) = self.owners.get_mut(&entry.source) {
            owner.entries = owner.entries.saturating_sub(1);
            if owner.entries == 0 {
                let _ = self.owners.remove(&entry.source);
            }
        }
    }
}

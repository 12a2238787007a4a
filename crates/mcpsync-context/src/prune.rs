//! Greedy budget pruning.
//!
//! Entries are ranked by priority (high first), then timestamp (recent
//! first), then insertion sequence (later first), which makes the order
//! total. Entries are kept in rank order while the running cost stays within
//! budget; the first entry that would overflow it is dropped together with
//! everything ranked below it.
//!
//! The top-ranked entry is always kept, even when its cost alone exceeds the
//! budget, so a non-empty store never prunes down to empty.

use std::cmp::Ordering;

use crate::entry::ContextEntry;

/// Rank order used for pruning: lower sorts first and survives longer.
pub fn rank(a: &ContextEntry, b: &ContextEntry) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.seq.cmp(&a.seq))
}

/// Keys to evict so the survivors fit `max_budget`, lowest ranked last.
/// Empty when the entries already fit.
pub fn select_evictions<'a, I>(entries: I, max_budget: u64) -> Vec<String>
where
    I: IntoIterator<Item = &'a ContextEntry>,
{
    let mut ranked: Vec<&ContextEntry> = entries.into_iter().collect();
    let total: u64 = ranked.iter().map(|e| e.cost).sum();
    if total <= max_budget {
        return Vec::new();
    }

    ranked.sort_by(|a, b| rank(a, b));

    let mut kept_cost = 0u64;
    let mut cut = ranked.len();
    for (idx, entry) in ranked.iter().enumerate() {
        let next = kept_cost.saturating_add(entry.cost);
        if idx > 0 && next > max_budget {
            cut = idx;
            break;
        }
        kept_cost = next;
    }

    ranked[cut..].iter().map(|e| e.key.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::Value;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn entry(key: &str, cost: u64, priority: i64, secs: i64, seq: u64) -> ContextEntry {
        ContextEntry {
            key: key.into(),
            timestamp: at(secs),
            payload: Value::Null,
            cost,
            source: "s".into(),
            owner: "u".into(),
            priority,
            seq,
        }
    }

    #[test]
    fn within_budget_is_noop() {
        let entries = [entry("a", 5, 1, 0, 0), entry("b", 5, 1, 0, 1)];
        assert!(select_evictions(&entries, 10).is_empty());
    }

    #[test]
    fn lowest_priority_goes_first() {
        let entries = [
            entry("A", 10, 3, 0, 0),
            entry("B", 10, 1, 0, 1),
            entry("C", 10, 2, 0, 2),
        ];
        assert_eq!(select_evictions(&entries, 20), vec!["B"]);
        assert_eq!(select_evictions(&entries, 10), vec!["C", "B"]);
    }

    #[test]
    fn recency_breaks_priority_ties() {
        let entries = [entry("old", 10, 1, 100, 0), entry("new", 10, 1, 200, 1)];
        assert_eq!(select_evictions(&entries, 10), vec!["old"]);
    }

    #[test]
    fn sequence_breaks_timestamp_ties() {
        let entries = [entry("first", 10, 1, 100, 0), entry("second", 10, 1, 100, 1)];
        assert_eq!(select_evictions(&entries, 10), vec!["first"]);
    }

    #[test]
    fn oversize_top_entry_is_kept_alone() {
        let entries = [entry("big", 50, 9, 0, 0), entry("small", 1, 1, 0, 1)];
        assert_eq!(select_evictions(&entries, 10), vec!["small"]);
    }

    #[test]
    fn greedy_stops_at_first_overflow() {
        // a(6) fits, b(6) overflows; c(1) would fit but ranks below b.
        let entries = [
            entry("a", 6, 3, 0, 0),
            entry("b", 6, 2, 0, 1),
            entry("c", 1, 1, 0, 2),
        ];
        assert_eq!(select_evictions(&entries, 10), vec!["b", "c"]);
    }
}

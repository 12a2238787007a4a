//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has started.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Entries in the context store.
    pub context_entries: usize,
    /// Sum of entry costs.
    pub total_cost: u64,
    /// Context budget.
    pub max_budget: u64,
}

/// Live counters read under their locks by the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    /// Registered connections.
    pub connections: usize,
    /// Context entries.
    pub context_entries: usize,
    /// Context cost.
    pub total_cost: u64,
    /// Context budget.
    pub max_budget: u64,
}

/// Build a health response.
pub fn health_check(start_time: Instant, shutting_down: bool, counters: HealthCounters) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections,
        context_entries: counters.context_entries,
        total_cost: counters.total_cost,
        max_budget: counters.max_budget,
    }
}

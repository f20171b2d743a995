use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::SourceKind;

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
    cache_hits: AtomicU64,
}

/// Process-local per-source counters. Reset on restart.
#[derive(Debug, Default)]
pub struct SourceStats {
    counters: [Counters; 4],
}

/// Point-in-time copy of one source's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceStatsSnapshot {
    pub source: SourceKind,
    pub requests: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: u64,
    pub cache_hits: u64,
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, source: SourceKind, latency_ms: u64) {
        let counters = &self.counters[source.index()];
        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        if source == SourceKind::Cache {
            counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Errors, timeouts, empty and under-covering answers all count as failures.
    pub fn record_failure(&self, source: SourceKind, latency_ms: u64) {
        let counters = &self.counters[source.index()];
        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters.failures.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, source: SourceKind) -> SourceStatsSnapshot {
        let counters = &self.counters[source.index()];
        let requests = counters.requests.load(Ordering::Relaxed);
        let total_latency_ms = counters.total_latency_ms.load(Ordering::Relaxed);
        SourceStatsSnapshot {
            source,
            requests,
            failures: counters.failures.load(Ordering::Relaxed),
            total_latency_ms,
            avg_latency_ms: total_latency_ms.checked_div(requests).unwrap_or(0),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot_all(&self) -> Vec<SourceStatsSnapshot> {
        SourceKind::ALL
            .into_iter()
            .map(|source| self.snapshot(source))
            .collect()
    }
}

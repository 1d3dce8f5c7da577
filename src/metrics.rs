//! Thread-safe pipeline metrics.
//!
//! Monotonic counters and incremental moving averages mutated under a
//! single mutex. Every counter has exactly one update site in the
//! pipeline; per-request terminal counters tick once per request, batch
//! averages once per batch, and token/cost totals once per successful
//! endpoint call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
struct Counters {
    total_requests: u64,
    total_batches: u64,
    total_tokens: u64,
    total_cost: f64,
    cache_hits: u64,
    dedup_hits: u64,
    completed: u64,
    errors: u64,
    avg_batch_size: f64,
    avg_latency_ms: f64,
}

/// Point-in-time metrics copy with derived gauges attached.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Submissions accepted: queued requests plus dedup short-circuits.
    pub total_requests: u64,
    /// Batches dispatched by workers.
    pub total_batches: u64,
    /// Tokens billed across all endpoint calls.
    pub total_tokens: u64,
    /// Estimated spend across all endpoint calls.
    pub total_cost: f64,
    /// Bundle-cache hits that skipped an endpoint call.
    pub cache_hits: u64,
    /// Submissions short-circuited by the response cache.
    pub dedup_hits: u64,
    /// Requests that reached a successful terminal outcome.
    pub completed: u64,
    /// Requests that reached a failed terminal outcome.
    pub errors: u64,
    /// Incremental mean batch size.
    pub avg_batch_size: f64,
    /// Incremental mean batch latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Requests currently waiting in priority buckets.
    pub pending_requests: usize,
    /// Bundle cache entry count.
    pub cache_size: usize,
    /// Response/dedup cache entry count.
    pub dedup_cache_size: usize,
    /// Wall-clock instant the metrics began accumulating.
    pub started_at: DateTime<Utc>,
    /// Wall-clock instant this snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Cumulative pipeline metrics.
pub struct Metrics {
    counters: Mutex<Counters>,
    started_at: DateTime<Utc>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started_at: Utc::now(),
        }
    }

    /// One submission accepted (queued or dedup-short-circuited).
    pub fn record_admission(&self) {
        self.lock().total_requests += 1;
    }

    /// One submission answered from the response cache.
    pub fn record_dedup_hit(&self) {
        self.lock().dedup_hits += 1;
    }

    /// One bundled call answered from the bundle cache.
    pub fn record_cache_hit(&self) {
        self.lock().cache_hits += 1;
    }

    /// Token and cost totals from one successful endpoint call.
    pub fn record_usage(&self, tokens: u64, cost: f64) {
        let mut counters = self.lock();
        counters.total_tokens += tokens;
        counters.total_cost += cost;
    }

    /// Terminal outcome for one request. Exactly one call per admitted
    /// request.
    pub fn record_outcome(&self, success: bool) {
        let mut counters = self.lock();
        if success {
            counters.completed += 1;
        } else {
            counters.errors += 1;
        }
    }

    /// One finished batch: updates the batch count and both moving
    /// averages as incremental means.
    pub fn record_batch(&self, batch_size: usize, latency_ms: u64) {
        let mut counters = self.lock();
        counters.total_batches += 1;
        let n = counters.total_batches as f64;
        counters.avg_batch_size += (batch_size as f64 - counters.avg_batch_size) / n;
        counters.avg_latency_ms += (latency_ms as f64 - counters.avg_latency_ms) / n;
    }

    /// Point-in-time copy with the supplied gauges attached.
    pub fn snapshot(
        &self,
        pending_requests: usize,
        cache_size: usize,
        dedup_cache_size: usize,
    ) -> MetricsSnapshot {
        let counters = self.lock().clone();
        MetricsSnapshot {
            total_requests: counters.total_requests,
            total_batches: counters.total_batches,
            total_tokens: counters.total_tokens,
            total_cost: counters.total_cost,
            cache_hits: counters.cache_hits,
            dedup_hits: counters.dedup_hits,
            completed: counters.completed,
            errors: counters.errors,
            avg_batch_size: counters.avg_batch_size,
            avg_latency_ms: counters.avg_latency_ms,
            pending_requests,
            cache_size,
            dedup_cache_size,
            started_at: self.started_at,
            taken_at: Utc::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

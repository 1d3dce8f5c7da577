//! Priority-grouped FIFO queue of pending requests.
//!
//! Requests wait in per-priority buckets until the scan loop releases them
//! through the configured strategy. Within a bucket, submission order is
//! preserved; across buckets, higher priorities are considered first.

use crate::assembler;
use crate::config::ProcessorConfig;
use crate::request::Request;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

pub(crate) type Buckets = BTreeMap<u8, VecDeque<Request>>;

/// Mutex-serialized priority buckets.
pub(crate) struct RequestQueue {
    buckets: Mutex<Buckets>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Append a request to its priority bucket; returns the new depth.
    pub fn enqueue(&self, request: Request) -> usize {
        let mut buckets = self.lock();
        buckets
            .entry(request.priority)
            .or_default()
            .push_back(request);
        buckets.values().map(VecDeque::len).sum()
    }

    /// Total queued requests across all buckets.
    pub fn depth(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    /// Release batches according to the configured strategy.
    pub fn collect(&self, now: Instant, config: &ProcessorConfig) -> Vec<Vec<Request>> {
        let mut buckets = self.lock();
        let batches = assembler::collect(&mut buckets, now, config);
        buckets.retain(|_, bucket| !bucket.is_empty());
        batches
    }

    /// Remove and return every queued request (shutdown drain), highest
    /// priority first.
    pub fn drain_all(&self) -> Vec<Request> {
        let mut buckets = self.lock();
        let mut drained = Vec::new();
        let priorities: Vec<u8> = buckets.keys().rev().copied().collect();
        for priority in priorities {
            if let Some(mut bucket) = buckets.remove(&priority) {
                drained.extend(bucket.drain(..));
            }
        }
        drained
    }

    /// Whether the bucket at `priority` meets the strategy's size trigger,
    /// used for the submit-side scan-loop wake.
    pub fn size_trigger_met(&self, priority: u8, config: &ProcessorConfig) -> bool {
        let buckets = self.lock();
        let len = buckets.get(&priority).map_or(0, VecDeque::len);
        assembler::size_trigger_met(len, priority, config)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

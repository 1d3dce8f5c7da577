//! Batch assembly strategies.
//!
//! Pure, time-dependent release policy over queue state: each strategy
//! tests a per-bucket predicate and consumes head elements into batches.
//! Buckets are traversed in descending priority order, and no batch mixes
//! requests from different buckets within one scan.

use crate::config::{BatchStrategy, ProcessorConfig};
use crate::logging::log_debug;
use crate::queue::Buckets;
use crate::request::Request;
use std::collections::VecDeque;
use tokio::time::Instant;

/// Release zero or more batches from the buckets under the configured
/// strategy. Consumed requests are removed from their buckets.
pub(crate) fn collect(
    buckets: &mut Buckets,
    now: Instant,
    config: &ProcessorConfig,
) -> Vec<Vec<Request>> {
    let mut batches = Vec::new();
    let priorities: Vec<u8> = buckets.keys().rev().copied().collect();

    for priority in priorities {
        let Some(bucket) = buckets.get_mut(&priority) else {
            continue;
        };
        match config.strategy {
            BatchStrategy::SizeBased => collect_size_based(bucket, config, &mut batches),
            BatchStrategy::TimeBased => collect_time_based(bucket, now, config, &mut batches),
            BatchStrategy::Hybrid => collect_hybrid(bucket, now, config, &mut batches),
            BatchStrategy::Priority => collect_priority(bucket, priority, config, &mut batches),
        }
    }

    if !batches.is_empty() {
        log_debug!(
            strategy = config.strategy.as_str(),
            batch_count = batches.len(),
            "Assembler released batches"
        );
    }
    batches
}

/// Whether a bucket of `len` requests at `priority` would release on size
/// alone, without waiting for the time condition. Drives the submit-side
/// scan wake.
pub(crate) fn size_trigger_met(len: usize, priority: u8, config: &ProcessorConfig) -> bool {
    match config.strategy {
        BatchStrategy::SizeBased | BatchStrategy::Hybrid => len >= config.batch_size,
        BatchStrategy::TimeBased => false,
        BatchStrategy::Priority => match priority {
            8..=10 => len > 0,
            5..=7 => len >= config.batch_size / 2,
            _ => len >= config.batch_size,
        },
    }
}

/// Full batches only, repeatedly, until the bucket can no longer fill one.
fn collect_size_based(
    bucket: &mut VecDeque<Request>,
    config: &ProcessorConfig,
    batches: &mut Vec<Vec<Request>>,
) {
    while bucket.len() >= config.batch_size {
        batches.push(take(bucket, config.batch_size));
    }
}

/// Up to one batch per bucket once the oldest request reaches the age
/// threshold.
fn collect_time_based(
    bucket: &mut VecDeque<Request>,
    now: Instant,
    config: &ProcessorConfig,
    batches: &mut Vec<Vec<Request>>,
) {
    if oldest_age_reached(bucket, now, config) {
        batches.push(take(bucket, config.batch_size));
    }
}

/// Size or age, whichever fires first; at most one batch per bucket per
/// scan.
fn collect_hybrid(
    bucket: &mut VecDeque<Request>,
    now: Instant,
    config: &ProcessorConfig,
    batches: &mut Vec<Vec<Request>>,
) {
    if bucket.len() >= config.batch_size {
        batches.push(take(bucket, config.batch_size));
    } else if oldest_age_reached(bucket, now, config) {
        batches.push(take(bucket, config.batch_size));
    }
}

/// Tiered release: priority 8+ drains the bucket completely (final partial
/// chunk included), 5-7 releases one batch once half-full, lower buckets
/// release only full batches.
fn collect_priority(
    bucket: &mut VecDeque<Request>,
    priority: u8,
    config: &ProcessorConfig,
    batches: &mut Vec<Vec<Request>>,
) {
    match priority {
        8..=10 => {
            while !bucket.is_empty() {
                batches.push(take(bucket, config.batch_size));
            }
        }
        5..=7 => {
            if bucket.len() >= config.batch_size / 2 && !bucket.is_empty() {
                batches.push(take(bucket, config.batch_size));
            }
        }
        _ => {
            if bucket.len() >= config.batch_size {
                batches.push(take(bucket, config.batch_size));
            }
        }
    }
}

fn oldest_age_reached(bucket: &VecDeque<Request>, now: Instant, config: &ProcessorConfig) -> bool {
    bucket
        .front()
        .is_some_and(|oldest| oldest.age(now) >= config.batch_timeout)
}

fn take(bucket: &mut VecDeque<Request>, max: usize) -> Vec<Request> {
    let count = bucket.len().min(max);
    bucket.drain(..count).collect()
}

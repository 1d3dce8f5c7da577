//! Sliding-window rate limiting for endpoint calls.
//!
//! Tracks call timestamps in one ordered window bounded by the hour cap
//! and admits a call only when the rolling second, minute, and hour
//! counts are all strictly below their configured limits. Saturated
//! callers suspend until the earliest timestamp whose expiry can free a
//! slot, then re-check.
//!
//! The retry path of the endpoint client uses [`record`](RateLimiter::record)
//! instead of [`acquire`](RateLimiter::acquire): a server-advised delay
//! takes precedence over local window math, but the attempt still lands in
//! the window so accounting stays truthful.

use crate::logging::log_debug;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Dual sliding-window limiter with burst smoothing.
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    per_minute: u32,
    per_hour: u32,
    burst_capacity: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32, burst_capacity: u32) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            per_minute,
            per_hour,
            burst_capacity,
        }
    }

    /// Block until a call is admissible under every window, then record it.
    ///
    /// No failure surface: the method suspends and re-checks until a slot
    /// frees. Cancellation is handled by the caller racing this future
    /// against its shutdown signal; dropping the future releases nothing
    /// because the timestamp is only recorded at the admission moment.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                Self::evict(&mut window, now);

                match self.admission_wake_time(&window, now) {
                    None => {
                        window.push_back(now);
                        return;
                    }
                    Some(wake_at) => {
                        log_debug!(
                            window_len = window.len(),
                            wait_ms = wake_at.saturating_duration_since(now).as_millis() as u64,
                            "Rate limiter saturated, waiting for window slot"
                        );
                        wake_at
                    }
                }
            };
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Record a call without blocking.
    ///
    /// Used by the retry path when the endpoint has already advised its
    /// own delay.
    pub fn record(&self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        Self::evict(&mut window, now);
        window.push_back(now);
    }

    /// Calls currently inside the rolling hour window.
    pub fn in_flight_window(&self) -> usize {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        Self::evict(&mut window, now);
        window.len()
    }

    /// `None` when admission is possible right now, otherwise the earliest
    /// instant at which some saturated window frees a slot.
    fn admission_wake_time(&self, window: &VecDeque<Instant>, now: Instant) -> Option<Instant> {
        let hour_count = window.len() as u32;
        let minute_count = Self::count_within(window, now, MINUTE);
        let second_count = Self::count_within(window, now, SECOND);

        if hour_count < self.per_hour
            && minute_count < self.per_minute
            && second_count < self.burst_capacity
        {
            return None;
        }

        let mut wake_at: Option<Instant> = None;
        if hour_count >= self.per_hour {
            if let Some(oldest) = window.front() {
                wake_at = Some(*oldest + HOUR);
            }
        }
        if minute_count >= self.per_minute {
            if let Some(oldest) = Self::oldest_within(window, now, MINUTE) {
                let candidate = oldest + MINUTE;
                wake_at = Some(wake_at.map_or(candidate, |w| w.min(candidate)));
            }
        }
        if second_count >= self.burst_capacity {
            if let Some(oldest) = Self::oldest_within(window, now, SECOND) {
                let candidate = oldest + SECOND;
                wake_at = Some(wake_at.map_or(candidate, |w| w.min(candidate)));
            }
        }

        // The saturated window always contains at least one entry, so a
        // wake time exists; fall back to a short poll if it somehow
        // doesn't.
        Some(wake_at.unwrap_or(now + Duration::from_millis(50)))
    }

    fn count_within(window: &VecDeque<Instant>, now: Instant, span: Duration) -> u32 {
        window
            .iter()
            .rev()
            .take_while(|ts| now.saturating_duration_since(**ts) < span)
            .count() as u32
    }

    fn oldest_within(window: &VecDeque<Instant>, now: Instant, span: Duration) -> Option<Instant> {
        window
            .iter()
            .find(|ts| now.saturating_duration_since(**ts) < span)
            .copied()
    }

    fn evict(window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= HOUR {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

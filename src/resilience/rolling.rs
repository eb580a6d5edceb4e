//! Rolling metrics window.
//!
//! # Responsibilities
//! - Count execution outcomes in fixed-duration buckets
//! - Aggregate the buckets still inside the horizon
//!
//! # Design Decisions
//! - Ring of buckets indexed by `epoch % buckets`, where
//!   `epoch = elapsed / bucket_duration`
//! - A stale bucket is reset by the first writer of the new interval; there is
//!   no background sweep
//! - Writers and readers only touch atomics, so a snapshot never blocks a writer
//! - Time comes from `tokio::time::Instant` (pausable in tests)

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::command::outcome::ExecutionOutcome;
use crate::config::schema::WindowConfig;

/// Epoch marker held while a bucket is being reset.
const RESETTING: u64 = u64::MAX;

struct Bucket {
    epoch: AtomicU64,
    counts: [AtomicU64; ExecutionOutcome::COUNT],
}

impl Bucket {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

/// Time-bucketed outcome counters.
pub struct RollingWindow {
    buckets: Box<[Bucket]>,
    bucket_ms: u64,
    origin: Instant,
}

impl RollingWindow {
    /// Create a window; zero-sized settings are clamped to one.
    pub fn new(config: &WindowConfig) -> Self {
        let count = config.buckets.max(1) as usize;
        Self {
            buckets: (0..count).map(|_| Bucket::new()).collect(),
            bucket_ms: config.bucket_ms.max(1),
            origin: Instant::now(),
        }
    }

    /// Total time covered by the window.
    pub fn horizon(&self) -> Duration {
        Duration::from_millis(self.bucket_ms * self.buckets.len() as u64)
    }

    /// Milliseconds since the window was created.
    pub(crate) fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(RESETTING - 1)
    }

    fn current_epoch(&self) -> u64 {
        self.now_ms() / self.bucket_ms
    }

    /// Record one outcome in the current bucket.
    pub fn record(&self, outcome: ExecutionOutcome) {
        let epoch = self.current_epoch();
        let bucket = &self.buckets[(epoch % self.buckets.len() as u64) as usize];

        loop {
            let seen = bucket.epoch.load(Ordering::Acquire);
            if seen == epoch {
                bucket.counts[outcome.index()].fetch_add(1, Ordering::Relaxed);
                return;
            }
            if seen == RESETTING {
                std::hint::spin_loop();
                continue;
            }
            if seen > epoch {
                // The slot already moved a full lap ahead of this writer.
                return;
            }
            if bucket
                .epoch
                .compare_exchange(seen, RESETTING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                for count in &bucket.counts {
                    count.store(0, Ordering::Relaxed);
                }
                bucket.epoch.store(epoch, Ordering::Release);
            }
        }
    }

    /// Aggregate counts over every bucket inside the horizon.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let epoch = self.current_epoch();
        let oldest = epoch.saturating_sub(self.buckets.len() as u64 - 1);
        let mut counts = [0u64; ExecutionOutcome::COUNT];

        for bucket in self.buckets.iter() {
            let bucket_epoch = bucket.epoch.load(Ordering::Acquire);
            if bucket_epoch == RESETTING || bucket_epoch < oldest || bucket_epoch > epoch {
                continue;
            }
            for (total, count) in counts.iter_mut().zip(bucket.counts.iter()) {
                *total += count.load(Ordering::Relaxed);
            }
        }

        MetricsSnapshot::from_counts(&counts)
    }

    /// Zero every bucket.
    pub fn reset(&self) {
        for bucket in self.buckets.iter() {
            for count in &bucket.counts {
                count.store(0, Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for RollingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingWindow")
            .field("buckets", &self.buckets.len())
            .field("bucket_ms", &self.bucket_ms)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Aggregated outcome counts over a rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub short_circuited: u64,
    pub rejected: u64,
    pub fallback_success: u64,
    pub fallback_failure: u64,
    pub ignored: u64,
    pub response_from_cache: u64,
}

impl MetricsSnapshot {
    fn from_counts(counts: &[u64; ExecutionOutcome::COUNT]) -> Self {
        let get = |outcome: ExecutionOutcome| counts[outcome.index()];
        Self {
            success: get(ExecutionOutcome::Success),
            failure: get(ExecutionOutcome::Failure),
            timeout: get(ExecutionOutcome::Timeout),
            short_circuited: get(ExecutionOutcome::ShortCircuited),
            rejected: get(ExecutionOutcome::Rejected),
            fallback_success: get(ExecutionOutcome::FallbackSuccess),
            fallback_failure: get(ExecutionOutcome::FallbackFailure),
            ignored: get(ExecutionOutcome::Ignored),
            response_from_cache: get(ExecutionOutcome::ResponseFromCache),
        }
    }

    /// Count for a single outcome.
    pub fn count(&self, outcome: ExecutionOutcome) -> u64 {
        match outcome {
            ExecutionOutcome::Success => self.success,
            ExecutionOutcome::Failure => self.failure,
            ExecutionOutcome::Timeout => self.timeout,
            ExecutionOutcome::ShortCircuited => self.short_circuited,
            ExecutionOutcome::Rejected => self.rejected,
            ExecutionOutcome::FallbackSuccess => self.fallback_success,
            ExecutionOutcome::FallbackFailure => self.fallback_failure,
            ExecutionOutcome::Ignored => self.ignored,
            ExecutionOutcome::ResponseFromCache => self.response_from_cache,
        }
    }

    /// Requests that count toward the breaker's volume threshold.
    pub fn total_requests(&self) -> u64 {
        self.success + self.error_count()
    }

    /// Requests that count as errors for the breaker.
    pub fn error_count(&self) -> u64 {
        self.failure + self.timeout + self.rejected
    }

    /// Integer error percentage, 0 when there were no requests.
    pub fn error_percentage(&self) -> u64 {
        let total = self.total_requests();
        if total == 0 {
            return 0;
        }
        self.error_count() * 100 / total
    }
}

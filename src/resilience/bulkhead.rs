//! Bulkhead (per-group concurrency limiter).
//!
//! # Responsibilities
//! - Bound in-flight executions per command group
//! - Optionally hold a bounded number of callers waiting for a slot
//! - Reject immediately once both are exhausted
//!
//! # Design Decisions
//! - One semaphore per group, so a saturated group cannot starve another
//! - Permits are RAII guards; dropping one (success, error, timeout,
//!   cancellation) always returns the slot
//! - Queue depth is tracked with a CAS loop and released by a drop guard

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::command::key::GroupKey;
use crate::config::schema::BulkheadConfig;
use crate::observability::metrics;

/// Returned when a group has no free slot and no room in its queue.
#[derive(Debug, Clone, Error)]
#[error("bulkhead {group} saturated ({in_flight}/{capacity} in flight, {queued} queued)")]
pub struct BulkheadRejected {
    pub group: GroupKey,
    pub in_flight: usize,
    pub capacity: usize,
    pub queued: usize,
}

/// Concurrency limiter for one command group.
#[derive(Debug)]
pub struct Bulkhead {
    group: GroupKey,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    max_queue: AtomicUsize,
    queued: AtomicUsize,
    peak_in_flight: AtomicUsize,
    rejected: AtomicU64,
}

impl Bulkhead {
    /// Create a bulkhead; a zero capacity is clamped to one.
    pub fn new(group: GroupKey, config: &BulkheadConfig) -> Self {
        let capacity = config.max_concurrent.max(1);
        Self {
            group,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_queue: AtomicUsize::new(config.max_queue),
            queued: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Executions currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Highest in-flight count observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Change the queue bound (hot reload). Callers already queued keep waiting.
    pub fn set_max_queue(&self, max_queue: usize) {
        let previous = self.max_queue.swap(max_queue, Ordering::Relaxed);
        if previous != max_queue {
            tracing::info!(group = %self.group, previous, max_queue, "Bulkhead queue bound updated");
        }
    }

    /// Take a slot if one is free right now. Never waits.
    pub fn try_acquire(&self) -> Result<BulkheadPermit, BulkheadRejected> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(self.admit(permit)),
            Err(_) => Err(self.reject()),
        }
    }

    /// Take a slot, waiting in the bounded queue if the group is saturated.
    ///
    /// Fails fast when the queue is full. The wait itself is bounded by the
    /// caller's deadline.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadRejected> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(self.admit(permit));
        }

        let max_queue = self.max_queue.load(Ordering::Relaxed);
        let mut current = self.queued.load(Ordering::Relaxed);
        loop {
            if current >= max_queue {
                return Err(self.reject());
            }
            match self.queued.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let _slot = QueueSlot(&self.queued);

        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => Ok(self.admit(permit)),
            Err(_) => Err(self.reject()),
        }
    }

    /// Return a slot explicitly; equivalent to dropping the permit.
    pub fn release(&self, permit: BulkheadPermit) {
        drop(permit);
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        let in_flight = self.in_flight();
        self.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
        metrics::record_bulkhead_in_flight(&self.group, in_flight);
        BulkheadPermit {
            permit: Some(permit),
            semaphore: Arc::clone(&self.semaphore),
            capacity: self.capacity,
            group: self.group.clone(),
        }
    }

    fn reject(&self) -> BulkheadRejected {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_bulkhead_rejected(&self.group);
        let rejection = BulkheadRejected {
            group: self.group.clone(),
            in_flight: self.in_flight(),
            capacity: self.capacity,
            queued: self.queued(),
        };
        tracing::debug!(group = %self.group, in_flight = rejection.in_flight, queued = rejection.queued, "Bulkhead rejected execution");
        rejection
    }
}

/// An execution slot. The slot is returned when this is dropped, on every
/// path including timeout and cancellation.
#[derive(Debug)]
pub struct BulkheadPermit {
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    group: GroupKey,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        let in_flight = self.capacity - self.semaphore.available_permits();
        metrics::record_bulkhead_in_flight(&self.group, in_flight);
    }
}

struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

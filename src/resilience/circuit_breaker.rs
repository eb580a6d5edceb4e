//! Circuit breaker for remote dependency protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests short-circuit to fallback
//! - Half-Open: a single probe tests whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: volume >= request_volume_threshold
//!                AND error% >= error_threshold_percentage within window
//! Open → Half-Open: sleep_window elapsed (one caller wins the probe)
//! Half-Open → Closed: probe succeeds (window is reset)
//! Half-Open → Open: probe fails, times out, is rejected or raises an ignored error
//! ```
//!
//! # Design Decisions
//! - One breaker per command key, the only writer of that key's state
//! - State and entry time share one atomic word so every transition is a single CAS
//! - The probe is a token: only its holder moves Half-Open, and dropping it
//!   unreported reopens the circuit for the next caller
//! - Properties are swapped atomically on config reload

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::command::key::CommandKey;
use crate::command::outcome::ExecutionOutcome;
use crate::config::schema::{BreakerConfig, WindowConfig};
use crate::observability::metrics;
use crate::resilience::rolling::{MetricsSnapshot, RollingWindow};

/// Circuit state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = 0b11;

fn pack(state: CircuitState, since_ms: u64) -> u64 {
    (since_ms << STATE_BITS) | state as u64
}

fn unpack(raw: u64) -> (CircuitState, u64) {
    (CircuitState::from((raw & STATE_MASK) as u8), raw >> STATE_BITS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdmissionKind {
    Allowed,
    /// Holds the status word written when the probe was granted.
    Probe(u64),
    Denied,
}

/// Admission decision for one execution.
///
/// A probe admission is the only one that can move a Half-Open circuit.
/// Dropping it unreported hands the probe slot to the next caller.
#[must_use]
#[derive(Debug)]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    kind: AdmissionKind,
    reported: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, kind: AdmissionKind) -> Self {
        Self {
            breaker,
            kind,
            reported: false,
        }
    }

    pub fn is_permitted(&self) -> bool {
        self.kind != AdmissionKind::Denied
    }

    pub fn is_probe(&self) -> bool {
        matches!(self.kind, AdmissionKind::Probe(_))
    }

    /// Record the execution outcome on the breaker.
    pub fn report(mut self, outcome: ExecutionOutcome) {
        self.reported = true;
        match self.kind {
            AdmissionKind::Probe(token) => self.breaker.complete_probe(token, outcome),
            _ => self.breaker.mark(outcome),
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let (false, AdmissionKind::Probe(token)) = (self.reported, self.kind) {
            self.breaker.abandon_probe(token);
        }
    }
}

/// Per-command circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: CommandKey,
    config: ArcSwap<BreakerConfig>,
    /// `(since_ms << 2) | state`
    status: AtomicU64,
    window: RollingWindow,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(key: CommandKey, config: BreakerConfig, window: &WindowConfig) -> Self {
        Self {
            key,
            config: ArcSwap::from_pointee(config),
            status: AtomicU64::new(pack(CircuitState::Closed, 0)),
            window: RollingWindow::new(window),
            trips: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    /// Current properties.
    pub fn config(&self) -> Arc<BreakerConfig> {
        self.config.load_full()
    }

    /// Swap in new properties (hot reload).
    pub fn update_config(&self, config: BreakerConfig) {
        if *self.config.load_full() != config {
            tracing::info!(command = %self.key, ?config, "Circuit breaker properties updated");
            self.config.store(Arc::new(config));
        }
    }

    /// Current state. A forced-open breaker reports `Open`.
    pub fn state(&self) -> CircuitState {
        if self.config.load().force_open {
            return CircuitState::Open;
        }
        unpack(self.status.load(Ordering::Acquire)).0
    }

    /// Aggregated counts over the rolling window.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.window.snapshot()
    }

    /// Number of Closed → Open transitions so far.
    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Decide whether one execution may proceed.
    ///
    /// In Open state, the first caller after the sleep window becomes the
    /// half-open probe; every other caller is denied until that probe
    /// reports back or is dropped.
    pub fn admit(&self) -> Admission<'_> {
        let config = self.config.load();
        if config.force_open {
            return Admission::new(self, AdmissionKind::Denied);
        }
        if config.force_closed || !config.enabled {
            return Admission::new(self, AdmissionKind::Allowed);
        }

        let raw = self.status.load(Ordering::Acquire);
        let (state, since) = unpack(raw);
        let kind = match state {
            CircuitState::Closed => AdmissionKind::Allowed,
            CircuitState::HalfOpen => AdmissionKind::Denied,
            CircuitState::Open => {
                let now = self.window.now_ms();
                if now.saturating_sub(since) < config.sleep_window_ms {
                    AdmissionKind::Denied
                } else {
                    let token = pack(CircuitState::HalfOpen, now);
                    match self
                        .status
                        .compare_exchange(raw, token, Ordering::AcqRel, Ordering::Acquire)
                    {
                        Ok(_) => {
                            tracing::info!(command = %self.key, "Circuit half-open, allowing probe request");
                            metrics::record_circuit_state(&self.key, CircuitState::HalfOpen);
                            AdmissionKind::Probe(token)
                        }
                        Err(_) => AdmissionKind::Denied,
                    }
                }
            }
        };
        Admission::new(self, kind)
    }

    /// Record an outcome of a non-probe execution.
    ///
    /// Only a Closed circuit reacts; while Open or Half-Open the outcome is
    /// counted but cannot move the state.
    pub fn mark(&self, outcome: ExecutionOutcome) {
        self.window.record(outcome);

        let raw = self.status.load(Ordering::Acquire);
        if unpack(raw).0 == CircuitState::Closed && outcome.is_health_event() {
            self.evaluate(raw);
        }
    }

    /// Record the outcome of the probe holding `token`.
    fn complete_probe(&self, token: u64, outcome: ExecutionOutcome) {
        self.window.record(outcome);

        if outcome == ExecutionOutcome::Success {
            if self.transition(token, CircuitState::Closed) {
                self.window.reset();
                tracing::info!(command = %self.key, "Probe succeeded, circuit closed");
            }
        } else if outcome.is_error() || outcome == ExecutionOutcome::Ignored {
            if self.transition(token, CircuitState::Open) {
                tracing::warn!(command = %self.key, outcome = outcome.as_str(), "Probe failed, circuit re-opened");
            }
        }
    }

    /// Hand the probe slot back after its caller went away without an outcome.
    /// The circuit returns to Open with the sleep window already elapsed.
    fn abandon_probe(&self, token: u64) {
        let sleep = self.config.load().sleep_window_ms;
        let reopened = pack(CircuitState::Open, self.window.now_ms().saturating_sub(sleep));
        if self
            .status
            .compare_exchange(token, reopened, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            metrics::record_circuit_state(&self.key, CircuitState::Open);
            tracing::warn!(command = %self.key, "Half-open probe abandoned, next caller may probe");
        }
    }

    /// Trip the circuit if the window crossed both thresholds.
    fn evaluate(&self, raw: u64) {
        let config = self.config.load();
        if !config.enabled || config.force_closed {
            return;
        }

        let snapshot = self.window.snapshot();
        if snapshot.total_requests() < config.request_volume_threshold {
            return;
        }
        if snapshot.error_percentage() < config.error_threshold_percentage {
            return;
        }

        if self.transition(raw, CircuitState::Open) {
            self.trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                command = %self.key,
                requests = snapshot.total_requests(),
                error_percentage = snapshot.error_percentage(),
                "Circuit opened"
            );
        }
    }

    fn transition(&self, raw: u64, to: CircuitState) -> bool {
        let changed = self
            .status
            .compare_exchange(raw, pack(to, self.window.now_ms()), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            metrics::record_circuit_state(&self.key, to);
        }
        changed
    }

    /// Manually open the circuit (maintenance).
    pub fn trip(&self) {
        self.status
            .store(pack(CircuitState::Open, self.window.now_ms()), Ordering::Release);
        self.trips.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_state(&self.key, CircuitState::Open);
        tracing::warn!(command = %self.key, "Circuit manually tripped");
    }

    /// Manually close the circuit and clear its window.
    pub fn reset(&self) {
        self.status
            .store(pack(CircuitState::Closed, self.window.now_ms()), Ordering::Release);
        self.window.reset();
        metrics::record_circuit_state(&self.key, CircuitState::Closed);
        tracing::info!(command = %self.key, "Circuit manually reset");
    }
}

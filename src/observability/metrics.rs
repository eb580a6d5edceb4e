//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define command, breaker, bulkhead and collapser metrics
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `command_events_total` (counter): outcomes by command, event
//! - `command_latency_seconds` (histogram): primary path latency by command
//! - `circuit_state` (gauge): 0=closed, 1=open, 2=half_open
//! - `circuit_open_total` (counter): transitions into open by command
//! - `bulkhead_in_flight` (gauge): occupied slots by group
//! - `bulkhead_rejected_total` (counter): rejections by group
//! - `collapser_batches_total` (counter): dispatched batches by collapser
//! - `collapser_batch_size` (histogram): items per batch by collapser
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are the command, group or collapser key only

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

use crate::command::key::{CommandKey, GroupKey};
use crate::command::outcome::ExecutionOutcome;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_outcome(command: &CommandKey, outcome: ExecutionOutcome) {
    ::metrics::counter!("command_events_total",
        "command" => command.to_string(),
        "event" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_latency(command: &CommandKey, elapsed: Duration) {
    ::metrics::histogram!("command_latency_seconds", "command" => command.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_circuit_state(command: &CommandKey, state: CircuitState) {
    ::metrics::gauge!("circuit_state", "command" => command.to_string()).set(state as u8 as f64);
    if state == CircuitState::Open {
        ::metrics::counter!("circuit_open_total", "command" => command.to_string()).increment(1);
    }
}

pub fn record_bulkhead_in_flight(group: &GroupKey, in_flight: usize) {
    ::metrics::gauge!("bulkhead_in_flight", "group" => group.to_string()).set(in_flight as f64);
}

pub fn record_bulkhead_rejected(group: &GroupKey) {
    ::metrics::counter!("bulkhead_rejected_total", "group" => group.to_string()).increment(1);
}

pub fn record_batch(collapser: &CommandKey, size: usize) {
    ::metrics::counter!("collapser_batches_total", "collapser" => collapser.to_string()).increment(1);
    ::metrics::histogram!("collapser_batch_size", "collapser" => collapser.to_string())
        .record(size as f64);
}

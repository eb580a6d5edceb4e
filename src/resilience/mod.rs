//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Command invocation:
//!     → circuit_breaker.rs (admit: closed / open / half-open probe token)
//!     → bulkhead.rs (per-group slot, bounded queue, fail fast)
//!     → timeouts.rs (deadline around queue wait + execution)
//!     → outcome recorded into rolling.rs via the breaker
//! ```
//!
//! # Design Decisions
//! - Every remote call has a deadline unless explicitly disabled
//! - No retries: callers compose them around `execute`
//! - Circuit breaker prevents cascading failures
//! - All counters are atomics; no lock is held across an await

pub mod bulkhead;
pub mod circuit_breaker;
pub mod rolling;
pub mod timeouts;

pub use bulkhead::{Bulkhead, BulkheadPermit, BulkheadRejected};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use rolling::{MetricsSnapshot, RollingWindow};

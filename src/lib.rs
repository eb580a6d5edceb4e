//! Resilient remote invocation.
//!
//! Wraps outbound calls in commands that are isolated per group by a
//! bulkhead, guarded per key by a circuit breaker fed from a rolling metrics
//! window, bounded by a deadline and backed by an optional fallback. Results
//! can be memoized per request scope, and single-item requests can be
//! collapsed into batches.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller
//!     │  execute / queue / fire_and_forget
//!     ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ command::executor                                         │
//!   │   ┌────────────────┐  ┌──────────┐  ┌──────────┐          │
//!   │   │circuit_breaker │─▶│ bulkhead │─▶│ timeouts │─▶ remote │
//!   │   └───────▲────────┘  └──────────┘  └──────────┘    call  │
//!   │           │ outcome                                       │
//!   │   ┌───────┴────────┐                                      │
//!   │   │ rolling window │        fallback on deny / failure    │
//!   │   └────────────────┘                                      │
//!   └──────────────────────────────────────────────────────────┘
//!        ▲                         ▲
//!        │ cache::RequestScope     │ collapser::Collapser
//!        │ (memoize per request)   │ (merge into batch command)
//! ```

// Core
pub mod command;
pub mod resilience;

// Composition
pub mod cache;
pub mod collapser;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use cache::{with_scope, RequestScope};
pub use collapser::{CollapsedFuture, Collapser, CollapserError, CollapserSettings};
pub use command::{
    Command, CommandError, CommandExecutor, CommandFuture, CommandKey, CommandRegistry,
    ExecutionOutcome, FallbackCause, GroupKey,
};
pub use config::InvokerConfig;
pub use resilience::{CircuitState, MetricsSnapshot};

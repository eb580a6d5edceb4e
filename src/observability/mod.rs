//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! executor, breaker, bulkhead, collapser produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap; with no recorder installed they are no-ops
//! - The rolling window inside each breaker is the source of truth for
//!   health decisions; exported metrics are for dashboards only

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;

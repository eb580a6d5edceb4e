//! Request-scoped caching.
//!
//! # Data Flow
//! ```text
//! with_scope(|scope| ..)
//!     → scope.cached(executor, command, input)
//!         hit  → memoized value, ResponseFromCache recorded
//!         miss → executor.execute → memoize on Ok
//!     → scope closed and cleared on exit
//! ```

pub mod request_cache;

pub use request_cache::{with_scope, RequestScope};

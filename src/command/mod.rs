//! Command subsystem.
//!
//! # Data Flow
//! ```text
//! Command::new(key, run) + fallback / ignore / cache key / timeout
//!     → CommandExecutor::{execute, queue, fire_and_forget}
//!     → registry.rs resolves breaker + bulkhead + deadline for the key
//!     → outcome.rs event marked on the breaker's rolling window
//!     → error.rs taxonomy returned to the caller
//! ```
//!
//! # Design Decisions
//! - Commands are explicit values; nothing is discovered by name
//! - One registry per process, built from config at startup
//! - No retries

pub mod definition;
pub mod error;
pub mod executor;
pub mod key;
pub mod outcome;
pub mod registry;

pub use definition::Command;
pub use error::{CommandError, FailureKind, FallbackCause};
pub use executor::{CommandExecutor, CommandFuture};
pub use key::{CommandKey, GroupKey};
pub use outcome::ExecutionOutcome;
pub use registry::{CommandEntry, CommandRegistry, CommandSnapshot};

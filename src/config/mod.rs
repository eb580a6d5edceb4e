//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → InvokerConfig (validated)
//!     → CommandRegistry::new
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → CommandRegistry::apply swaps live properties
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Window shape and bulkhead capacity are fixed at registration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BreakerConfig, BulkheadConfig, CollapserConfig, CommandConfig, CommandDefaults, GroupConfig,
    InvokerConfig, ObservabilityConfig, TimeoutConfig, WindowConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the invoker.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the command layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct InvokerConfig {
    /// Properties applied to every command unless overridden.
    pub defaults: CommandDefaults,

    /// Per-command overrides, registered at startup.
    pub commands: Vec<CommandConfig>,

    /// Bulkhead groups.
    pub groups: Vec<GroupConfig>,

    /// Request collapsers.
    pub collapsers: Vec<CollapserConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl InvokerConfig {
    /// Look up the override block for a command key.
    pub fn command(&self, key: &str) -> Option<&CommandConfig> {
        self.commands.iter().find(|c| c.key == key)
    }

    /// Look up a bulkhead group by name.
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Look up a collapser by key.
    pub fn collapser(&self, key: &str) -> Option<&CollapserConfig> {
        self.collapsers.iter().find(|c| c.key == key)
    }
}

/// Defaults shared by all commands.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CommandDefaults {
    pub timeout: TimeoutConfig,
    pub breaker: BreakerConfig,
    pub window: WindowConfig,
    pub bulkhead: BulkheadConfig,
}

/// Execution deadline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Enforce the deadline at all.
    pub enabled: bool,

    /// Deadline in milliseconds, including time spent queued for a bulkhead slot.
    pub timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 1000,
        }
    }
}

/// Circuit breaker properties. Hot-reloadable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// When false the breaker never denies and never trips.
    pub enabled: bool,

    /// Minimum requests in the rolling window before the error rate is considered.
    pub request_volume_threshold: u64,

    /// Error percentage (0-100) at or above which the circuit opens.
    pub error_threshold_percentage: u64,

    /// Time the circuit stays open before a probe is allowed, in milliseconds.
    pub sleep_window_ms: u64,

    /// Deny every request.
    pub force_open: bool,

    /// Allow every request (metrics are still recorded).
    pub force_closed: bool,
}

impl BreakerConfig {
    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            sleep_window_ms: 5000,
            force_open: false,
            force_closed: false,
        }
    }
}

/// Rolling metrics window shape. Fixed once a command is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of buckets.
    pub buckets: u32,

    /// Duration of one bucket in milliseconds.
    pub bucket_ms: u64,
}

impl WindowConfig {
    /// Total time covered by the window.
    pub fn horizon(&self) -> Duration {
        Duration::from_millis(self.bucket_ms.saturating_mul(u64::from(self.buckets)))
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            buckets: 10,
            bucket_ms: 1000,
        }
    }
}

/// Bulkhead capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum concurrent executions.
    pub max_concurrent: usize,

    /// Callers allowed to wait for a slot; 0 disables queueing.
    pub max_queue: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 0,
        }
    }
}

/// Per-command overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandConfig {
    /// Command key (e.g. "getUserCommand").
    pub key: String,

    /// Bulkhead group; defaults to a group named after the key.
    #[serde(default)]
    pub group: Option<String>,

    /// Deadline override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub breaker: Option<BreakerConfig>,

    #[serde(default)]
    pub window: Option<WindowConfig>,
}

impl CommandConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            group: None,
            timeout_ms: None,
            breaker: None,
            window: None,
        }
    }
}

/// Bulkhead group definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    /// Group name (e.g. "getUserGroup").
    pub name: String,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub max_queue: usize,
}

fn default_max_concurrent() -> usize {
    10
}

/// Request collapser settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollapserConfig {
    /// Collapser key; the batch command shares this key.
    pub key: String,

    /// Time a batch window stays open after its first item, in milliseconds.
    #[serde(default = "default_collapser_delay")]
    pub delay_ms: u64,

    /// Item count that flushes a window immediately.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_collapser_delay() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    100
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

//! Command-key registry.
//!
//! # Responsibilities
//! - Map each command key to its breaker, bulkhead and deadline
//! - Share one bulkhead between every command of a group
//! - Apply reloaded properties to live commands
//! - Expose read-only per-command state for dashboards
//!
//! # Design Decisions
//! - Configured commands are registered at startup; unknown keys are
//!   registered lazily with default properties on first use
//! - Window shape and bulkhead capacity are fixed at registration; breaker
//!   properties, deadlines and queue bounds are hot-reloadable

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::command::key::{CommandKey, GroupKey};
use crate::config::schema::{BreakerConfig, BulkheadConfig, InvokerConfig, WindowConfig};
use crate::resilience::bulkhead::Bulkhead;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::rolling::MetricsSnapshot;

/// Resilience components bound to one command key.
#[derive(Debug)]
pub struct CommandEntry {
    key: CommandKey,
    group: GroupKey,
    breaker: CircuitBreaker,
    bulkhead: Arc<Bulkhead>,
    timeout_enabled: AtomicBool,
    timeout_ms: AtomicU64,
}

impl CommandEntry {
    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.bulkhead
    }

    /// Configured deadline, `None` when timeouts are disabled.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_enabled
            .load(Ordering::Relaxed)
            .then(|| Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed)))
    }

    fn apply_timeout(&self, enabled: bool, timeout_ms: u64) {
        self.timeout_enabled.store(enabled, Ordering::Relaxed);
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }
}

/// Dashboard view of one command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSnapshot {
    pub key: CommandKey,
    pub group: GroupKey,
    pub state: CircuitState,
    pub trips: u64,
    pub metrics: MetricsSnapshot,
    pub error_percentage: u64,
    pub in_flight: usize,
    pub queued: usize,
    pub capacity: usize,
}

/// Registry of every command known to the process.
#[derive(Debug)]
pub struct CommandRegistry {
    config: ArcSwap<InvokerConfig>,
    commands: DashMap<CommandKey, Arc<CommandEntry>>,
    bulkheads: DashMap<GroupKey, Arc<Bulkhead>>,
}

/// Effective properties of one command under a given config.
struct Resolved {
    group: GroupKey,
    breaker: BreakerConfig,
    window: WindowConfig,
    bulkhead: BulkheadConfig,
    timeout_enabled: bool,
    timeout_ms: u64,
}

fn resolve(config: &InvokerConfig, key: &CommandKey) -> Resolved {
    let defaults = &config.defaults;
    let overrides = config.command(key.as_str());

    let group = overrides
        .and_then(|c| c.group.as_deref())
        .map(GroupKey::new)
        .unwrap_or_else(|| GroupKey::from(key));
    let bulkhead = config
        .group(group.as_str())
        .map(|g| BulkheadConfig {
            max_concurrent: g.max_concurrent,
            max_queue: g.max_queue,
        })
        .unwrap_or(defaults.bulkhead);

    Resolved {
        group,
        breaker: overrides
            .and_then(|c| c.breaker.clone())
            .unwrap_or_else(|| defaults.breaker.clone()),
        window: overrides.and_then(|c| c.window).unwrap_or(defaults.window),
        bulkhead,
        timeout_enabled: defaults.timeout.enabled,
        timeout_ms: overrides
            .and_then(|c| c.timeout_ms)
            .unwrap_or(defaults.timeout.timeout_ms),
    }
}

impl CommandRegistry {
    /// Build the registry and register every configured command.
    pub fn new(config: InvokerConfig) -> Self {
        let registry = Self {
            config: ArcSwap::from_pointee(config),
            commands: DashMap::new(),
            bulkheads: DashMap::new(),
        };

        let configured: Vec<CommandKey> = registry
            .config
            .load()
            .commands
            .iter()
            .map(|c| CommandKey::new(c.key.as_str()))
            .collect();
        for key in &configured {
            registry.resolve(key);
        }

        tracing::info!(
            commands = registry.commands.len(),
            groups = registry.bulkheads.len(),
            "Command registry initialized"
        );
        registry
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<InvokerConfig> {
        self.config.load_full()
    }

    /// Entry for `key`, registering it with default properties if unknown.
    pub fn resolve(&self, key: &CommandKey) -> Arc<CommandEntry> {
        if let Some(entry) = self.commands.get(key) {
            return Arc::clone(entry.value());
        }

        let entry = self
            .commands
            .entry(key.clone())
            .or_insert_with(|| Arc::new(self.build_entry(key)));
        Arc::clone(entry.value())
    }

    fn build_entry(&self, key: &CommandKey) -> CommandEntry {
        let config = self.config.load();
        let resolved = resolve(&config, key);

        let bulkhead = self
            .bulkheads
            .entry(resolved.group.clone())
            .or_insert_with(|| Arc::new(Bulkhead::new(resolved.group.clone(), &resolved.bulkhead)))
            .value()
            .clone();

        tracing::debug!(
            command = %key,
            group = %resolved.group,
            timeout_ms = resolved.timeout_ms,
            "Registered command"
        );

        CommandEntry {
            key: key.clone(),
            group: resolved.group,
            breaker: CircuitBreaker::new(key.clone(), resolved.breaker, &resolved.window),
            bulkhead,
            timeout_enabled: AtomicBool::new(resolved.timeout_enabled),
            timeout_ms: AtomicU64::new(resolved.timeout_ms),
        }
    }

    /// Apply a reloaded configuration to live commands and register new ones.
    pub fn apply(&self, config: InvokerConfig) {
        self.config.store(Arc::new(config));
        let config = self.config.load();

        for entry in self.commands.iter() {
            let resolved = resolve(&config, entry.key());
            if resolved.group != entry.group {
                tracing::warn!(
                    command = %entry.key(),
                    current = %entry.group,
                    configured = %resolved.group,
                    "Group change requires restart; keeping current bulkhead"
                );
            }
            entry.breaker.update_config(resolved.breaker);
            entry.apply_timeout(resolved.timeout_enabled, resolved.timeout_ms);
        }

        for bulkhead in self.bulkheads.iter() {
            let max_queue = config
                .group(bulkhead.group().as_str())
                .map_or(config.defaults.bulkhead.max_queue, |g| g.max_queue);
            bulkhead.set_max_queue(max_queue);
        }

        for command in &config.commands {
            self.resolve(&CommandKey::new(command.key.as_str()));
        }

        tracing::info!(commands = self.commands.len(), "Configuration applied");
    }

    /// Circuit state of a registered command.
    pub fn circuit_state(&self, key: &CommandKey) -> Option<CircuitState> {
        self.commands.get(key).map(|e| e.breaker.state())
    }

    /// Rolling metrics of a registered command.
    pub fn metrics(&self, key: &CommandKey) -> Option<MetricsSnapshot> {
        self.commands.get(key).map(|e| e.breaker.metrics())
    }

    /// Bulkhead of a group, if any command uses it.
    pub fn bulkhead(&self, group: &GroupKey) -> Option<Arc<Bulkhead>> {
        self.bulkheads.get(group).map(|b| Arc::clone(b.value()))
    }

    /// Dashboard view of every registered command, sorted by key.
    pub fn snapshot(&self) -> Vec<CommandSnapshot> {
        let mut snapshots: Vec<CommandSnapshot> = self
            .commands
            .iter()
            .map(|entry| {
                let metrics = entry.breaker.metrics();
                CommandSnapshot {
                    key: entry.key.clone(),
                    group: entry.group.clone(),
                    state: entry.breaker.state(),
                    trips: entry.breaker.trip_count(),
                    error_percentage: metrics.error_percentage(),
                    metrics,
                    in_flight: entry.bulkhead.in_flight(),
                    queued: entry.bulkhead.queued(),
                    capacity: entry.bulkhead.capacity(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new(InvokerConfig::default())
    }
}

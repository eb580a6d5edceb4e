//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

use resilient_call::config::{BreakerConfig, CommandConfig, GroupConfig, InvokerConfig};
use resilient_call::{Command, CommandExecutor};

/// Errors raised by the fake remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("null pointer")]
    NullPointer,

    #[error("service unavailable")]
    Unavailable,
}

/// Counts invocations of a fake remote operation.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Build a command whose remote operation is `f(call_index, input)`.
pub fn programmable_command<I, T, F, Fut>(key: &str, calls: &CallCounter, f: F) -> Command<I, T, RemoteError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(u32, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
{
    let calls = calls.clone();
    Command::new(key.to_string(), move |input| f(calls.next(), input))
}

/// Breaker that trips after `volume` requests at 50% errors and sleeps `sleep_ms`.
pub fn sensitive_breaker(volume: u64, sleep_ms: u64) -> BreakerConfig {
    BreakerConfig {
        request_volume_threshold: volume,
        error_threshold_percentage: 50,
        sleep_window_ms: sleep_ms,
        ..Default::default()
    }
}

/// Executor with `key` registered under `breaker`.
pub fn executor_with_breaker(key: &str, breaker: BreakerConfig) -> CommandExecutor {
    let mut config = InvokerConfig::default();
    let mut command = CommandConfig::new(key);
    command.breaker = Some(breaker);
    config.commands.push(command);
    CommandExecutor::from_config(config)
}

/// Like [`executor_with_breaker`], with deadlines switched off.
pub fn executor_without_timeouts(key: &str, breaker: BreakerConfig) -> CommandExecutor {
    let mut config = InvokerConfig::default();
    config.defaults.timeout.enabled = false;
    let mut command = CommandConfig::new(key);
    command.breaker = Some(breaker);
    config.commands.push(command);
    CommandExecutor::from_config(config)
}

/// Yield until `calls` reaches `n`.
pub async fn wait_for_calls(calls: &CallCounter, n: u32) {
    while calls.get() < n {
        tokio::task::yield_now().await;
    }
}

/// Executor where each `(key, group)` pair shares the named bulkhead group.
///
/// Breakers are disabled so only the bulkheads decide admission.
pub fn executor_with_groups(commands: &[(&str, &str)], groups: &[(&str, usize, usize)]) -> CommandExecutor {
    let mut config = InvokerConfig::default();
    config.defaults.breaker.enabled = false;
    for (key, group) in commands {
        let mut command = CommandConfig::new(*key);
        command.group = Some(group.to_string());
        config.commands.push(command);
    }
    for (name, max_concurrent, max_queue) in groups {
        config.groups.push(GroupConfig {
            name: name.to_string(),
            max_concurrent: *max_concurrent,
            max_queue: *max_queue,
        });
    }
    CommandExecutor::from_config(config)
}

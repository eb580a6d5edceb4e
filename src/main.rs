//! resilient-call demo.
//!
//! Runs the resilience scenarios against a simulated in-memory user service
//! and prints each result as JSON.
//!
//! ```text
//! resilient-call [--config invoker.toml [--watch]] <scenario>
//!
//!   fallback [id] [--down]   getUser, default user on failure
//!   command [id] [--down]    getUserCommand in getUserGroup
//!   exception <id>           1 → fallback, 2 → ignored error surfaced
//!   cache [id]               three lookups, one remote call
//!   remove-cache [id]        lookup, delete + invalidate, two lookups
//!   collapse                 1 and 2 share a batch, 3 goes alone
//!   breaker                  outage opens the circuit, recovery closes it
//!   dashboard                command snapshots under background load
//! ```

mod user_service;

use clap::{Parser, Subcommand};
use notify::RecommendedWatcher;
use serde_json::{json, Value};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use resilient_call::config::{load_config, ConfigWatcher, InvokerConfig};
use resilient_call::observability::{init_logging, init_metrics};
use resilient_call::{CommandExecutor, CommandKey, CommandRegistry};

use crate::user_service::{RemoteUsers, UserService};

#[derive(Parser)]
#[command(name = "resilient-call")]
#[command(about = "Resilience scenarios against a simulated user service", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes
    #[arg(short, long, requires = "config")]
    watch: bool,

    /// Simulated round-trip latency of the user service
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand)]
enum Scenario {
    /// Plain command with a default-user fallback
    Fallback {
        #[arg(default_value_t = 1)]
        id: i64,
        /// Simulate a user service outage
        #[arg(long)]
        down: bool,
    },
    /// Command with explicit command and group keys
    Command {
        #[arg(default_value_t = 1)]
        id: i64,
        #[arg(long)]
        down: bool,
    },
    /// Failure routed to fallback or passed through as ignored
    Exception { id: i64 },
    /// Repeated lookups inside one request scope
    Cache {
        #[arg(default_value_t = 1)]
        id: i64,
    },
    /// Lookup, removal and repeated lookups inside one request scope
    RemoveCache {
        #[arg(default_value_t = 1)]
        id: i64,
    },
    /// Collapse single lookups into batches
    Collapse,
    /// Open the circuit during an outage and close it after recovery
    Breaker {
        #[arg(long, default_value_t = 30)]
        requests: u32,
    },
    /// Print command snapshots while background load runs
    Dashboard {
        #[arg(long, default_value_t = 5)]
        rounds: u32,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => InvokerConfig::default(),
    };
    init_logging(&config.observability)?;

    tracing::info!(
        commands = config.commands.len(),
        groups = config.groups.len(),
        collapsers = config.collapsers.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let executor = CommandExecutor::from_config(config);
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => Some(watch_config(path, Arc::clone(executor.registry()))?),
        _ => None,
    };

    let remote = Arc::new(RemoteUsers::new(Duration::from_millis(cli.latency_ms)));
    let service = Arc::new(UserService::new(executor, remote));

    let report = run(&service, cli.scenario).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn watch_config(path: &Path, registry: Arc<CommandRegistry>) -> Result<RecommendedWatcher, notify::Error> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;
    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            registry.apply(config);
        }
    });
    Ok(handle)
}

async fn run(service: &Arc<UserService>, scenario: Scenario) -> Result<Value, Box<dyn Error>> {
    let report = match scenario {
        Scenario::Fallback { id, down } => {
            service.remote().set_available(!down);
            json!({ "scenario": "fallback", "result": service.get_user(id).await? })
        }
        Scenario::Command { id, down } => {
            service.remote().set_available(!down);
            let result = service.get_user_command(id).await?;
            let key = CommandKey::new("getUserCommand");
            let entry = service.executor().registry().resolve(&key);
            json!({
                "scenario": "command",
                "command": key,
                "group": entry.group(),
                "result": result,
            })
        }
        Scenario::Exception { id } => match service.get_user_exception(id).await {
            Ok(result) => json!({ "scenario": "exception", "result": result }),
            Err(e) => json!({
                "scenario": "exception",
                "error": e.to_string(),
                "outcome": e.outcome().map(|o| o.as_str()),
            }),
        },
        Scenario::Cache { id } => {
            let invocations = service.test_cache(id).await?;
            json!({ "scenario": "cache", "lookups": 3, "remote_calls": invocations })
        }
        Scenario::RemoveCache { id } => {
            let invocations = service.test_remove_cache(id).await?;
            json!({ "scenario": "remove-cache", "lookups": 3, "remote_calls": invocations })
        }
        Scenario::Collapse => collapse(service).await?,
        Scenario::Breaker { requests } => breaker(service, requests).await?,
        Scenario::Dashboard { rounds, interval_ms } => {
            dashboard(service, rounds, Duration::from_millis(interval_ms)).await
        }
    };
    Ok(report)
}

async fn collapse(service: &UserService) -> Result<Value, Box<dyn Error>> {
    let (first, second) = tokio::join!(service.get_future_user(1), service.get_future_user(2));
    let (first, second) = (first?, second?);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let third = service.get_future_user(3).await?;

    Ok(json!({
        "scenario": "collapse",
        "users": [first, second, third],
        "batches": service.collapser().batches_dispatched(),
        "remote_calls": service.remote().calls(),
    }))
}

async fn breaker(service: &UserService, requests: u32) -> Result<Value, Box<dyn Error>> {
    let key = CommandKey::new("getUserCommand");
    let registry = service.executor().registry();
    let entry = registry.resolve(&key);

    service.remote().set_available(false);
    let mut transitions = Vec::new();
    let mut last = entry.breaker().state();
    for request in 1..=requests {
        service.get_user_command(1).await?;
        let state = entry.breaker().state();
        if state != last {
            transitions.push(json!({ "request": request, "state": state }));
            last = state;
        }
    }
    let remote_calls_during_outage = service.remote().calls();

    service.remote().set_available(true);
    tokio::time::sleep(entry.breaker().config().sleep_window()).await;
    let probe = service.get_user_command(1).await?;
    transitions.push(json!({ "request": requests + 1, "state": entry.breaker().state() }));

    Ok(json!({
        "scenario": "breaker",
        "requests": requests,
        "remote_calls_during_outage": remote_calls_during_outage,
        "transitions": transitions,
        "probe": probe,
        "trips": entry.breaker().trip_count(),
    }))
}

async fn dashboard(service: &Arc<UserService>, rounds: u32, interval: Duration) -> Value {
    let load = {
        let service = Arc::clone(service);
        tokio::spawn(async move {
            loop {
                service.remote().set_available(fastrand::u8(0..10) > 2);
                let id = fastrand::i64(1..=6);
                if let Err(e) = service.get_user(id).await {
                    tracing::warn!(id, error = %e, "Background request failed");
                }
                tokio::time::sleep(Duration::from_millis(fastrand::u64(5..25))).await;
            }
        })
    };

    let registry = service.executor().registry();
    for round in 1..=rounds {
        tokio::time::sleep(interval).await;
        let line = json!({ "round": round, "commands": registry.snapshot() });
        println!("{line}");
    }
    load.abort();

    json!({ "scenario": "dashboard", "commands": registry.snapshot() })
}

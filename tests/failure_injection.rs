//! Failure injection tests for command execution.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilient_call::command::FailureKind;
use resilient_call::config::{BreakerConfig, CommandConfig, InvokerConfig};
use resilient_call::{CircuitState, Command, CommandError, CommandExecutor, CommandKey};

mod common;
use common::{CallCounter, RemoteError};

#[tokio::test]
async fn test_breaker_opens_only_at_volume_threshold() {
    // 1. Ten-request volume threshold at 50% errors
    let exec = common::executor_with_breaker("getUser", common::sensitive_breaker(10, 5000));
    let calls = CallCounter::default();

    // 2. First six calls fail, the rest succeed
    let cmd = common::programmable_command("getUser", &calls, |n, id: u64| async move {
        if n < 6 {
            Err(RemoteError::Unavailable)
        } else {
            Ok(id)
        }
    })
    .fallback_value(0);
    let key = CommandKey::new("getUser");

    // 3. Nine calls: 6 failures + 3 successes, below the volume threshold
    for _ in 0..9 {
        exec.execute(&cmd, 1).await.unwrap();
    }
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Closed));

    // 4. Tenth call reaches the volume at 60% errors
    exec.execute(&cmd, 1).await.unwrap();
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));

    // 5. Next call is served by the fallback without touching the remote
    assert_eq!(exec.execute(&cmd, 1).await.unwrap(), 0);
    assert_eq!(calls.get(), 10);

    let metrics = exec.registry().metrics(&key).unwrap();
    assert_eq!(metrics.failure, 6);
    assert_eq!(metrics.success, 4);
    assert_eq!(metrics.short_circuited, 1);
    assert_eq!(metrics.fallback_success, 7);
}

#[tokio::test]
async fn test_open_circuit_without_fallback_surfaces_short_circuit() {
    let exec = common::executor_with_breaker("getUser", common::sensitive_breaker(2, 5000));
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUser", &calls, |_, _: u64| async {
        Err::<u64, _>(RemoteError::Unavailable)
    });

    for _ in 0..2 {
        let err = exec.execute(&cmd, 1).await.unwrap_err();
        assert!(matches!(err, CommandError::RemoteFailure { .. }));
    }

    let err = exec.execute(&cmd, 1).await.unwrap_err();
    assert!(matches!(err, CommandError::ShortCircuited { .. }));
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_closes_circuit() {
    // 1. Trip the circuit during an outage
    let exec = common::executor_with_breaker("getUser", common::sensitive_breaker(2, 1000));
    let healthy = Arc::new(AtomicU32::new(0));
    let flag = healthy.clone();
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUser", &calls, move |_, id: u64| {
        let healthy = flag.load(Ordering::SeqCst) == 1;
        async move {
            if healthy {
                Ok(id)
            } else {
                Err(RemoteError::Unavailable)
            }
        }
    })
    .fallback_value(0);
    let key = CommandKey::new("getUser");

    exec.execute(&cmd, 1).await.unwrap();
    exec.execute(&cmd, 1).await.unwrap();
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));

    // 2. Still inside the sleep window: short-circuited
    tokio::time::advance(Duration::from_millis(500)).await;
    exec.execute(&cmd, 1).await.unwrap();
    assert_eq!(calls.get(), 2);

    // 3. Remote recovers, sleep window elapses, probe succeeds
    healthy.store(1, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(exec.execute(&cmd, 7).await.unwrap(), 7);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Closed));
    assert_eq!(calls.get(), 3);

    // 4. Window was reset on close
    let metrics = exec.registry().metrics(&key).unwrap();
    assert_eq!(metrics.total_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_circuit() {
    let exec = common::executor_with_breaker("getUser", common::sensitive_breaker(2, 1000));
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUser", &calls, |_, _: u64| async {
        Err::<u64, _>(RemoteError::Unavailable)
    })
    .fallback_value(0);
    let key = CommandKey::new("getUser");

    exec.execute(&cmd, 1).await.unwrap();
    exec.execute(&cmd, 1).await.unwrap();

    tokio::time::advance(Duration::from_millis(1000)).await;
    exec.execute(&cmd, 1).await.unwrap();
    assert_eq!(calls.get(), 3);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));

    // Sleep window restarted at the failed probe
    tokio::time::advance(Duration::from_millis(500)).await;
    exec.execute(&cmd, 1).await.unwrap();
    assert_eq!(calls.get(), 3);
}

#[tokio::test]
async fn test_exception_routed_to_fallback_with_cause() {
    let exec = CommandExecutor::default();
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUserException", &calls, |_, id: u64| async move {
        match id {
            1 => Err(RemoteError::IndexOutOfBounds),
            2 => Err(RemoteError::NullPointer),
            _ => Ok(format!("user-{id}")),
        }
    })
    .ignore_errors(|e| *e == RemoteError::NullPointer)
    .fallback(|_, cause| async move {
        assert_eq!(cause.kind(), FailureKind::Failure);
        assert_eq!(cause.error(), Some(&RemoteError::IndexOutOfBounds));
        Ok("default2".to_string())
    });

    assert_eq!(exec.execute(&cmd, 1).await.unwrap(), "default2");
    assert_eq!(exec.execute(&cmd, 3).await.unwrap(), "user-3");
}

#[tokio::test]
async fn test_ignored_error_surfaced_untouched() {
    let exec = common::executor_with_breaker("getUserException", common::sensitive_breaker(1, 5000));
    let calls = CallCounter::default();
    let fallbacks = Arc::new(AtomicU32::new(0));
    let counter = fallbacks.clone();
    let cmd = common::programmable_command("getUserException", &calls, |_, _: u64| async {
        Err::<String, _>(RemoteError::NullPointer)
    })
    .ignore_errors(|e| *e == RemoteError::NullPointer)
    .fallback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok("default2".to_string()) }
    });
    let key = CommandKey::new("getUserException");

    for _ in 0..5 {
        let err = exec.execute(&cmd, 2).await.unwrap_err();
        assert!(matches!(err, CommandError::Ignored { .. }));
        assert_eq!(err.into_source(), Some(RemoteError::NullPointer));
    }

    assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Closed));

    let metrics = exec.registry().metrics(&key).unwrap();
    assert_eq!(metrics.ignored, 5);
    assert_eq!(metrics.error_count(), 0);
}

#[tokio::test]
async fn test_fallback_failure_is_tagged_not_retried() {
    let exec = CommandExecutor::default();
    let calls = CallCounter::default();
    let fallbacks = Arc::new(AtomicU32::new(0));
    let counter = fallbacks.clone();
    let cmd = common::programmable_command("getUser", &calls, |_, _: u64| async {
        Err::<u64, _>(RemoteError::Unavailable)
    })
    .fallback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(RemoteError::IndexOutOfBounds) }
    });

    let err = exec.execute(&cmd, 1).await.unwrap_err();
    match err {
        CommandError::FallbackFailure { cause, source, .. } => {
            assert_eq!(cause, FailureKind::Failure);
            assert_eq!(source, RemoteError::IndexOutOfBounds);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.get(), 1);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_abandons_operation_and_releases_slot() {
    let mut config = InvokerConfig::default();
    let mut slow = CommandConfig::new("getUser");
    slow.timeout_ms = Some(50);
    config.commands.push(slow);
    let exec = CommandExecutor::from_config(config);

    let finished = Arc::new(AtomicU32::new(0));
    let flag = finished.clone();
    let cmd: Command<u64, u64, RemoteError> = Command::new("getUser", move |_| {
        let flag = flag.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    })
    .fallback(|_, cause| async move {
        assert_eq!(cause.kind(), FailureKind::Timeout);
        Ok(0)
    });

    assert_eq!(exec.execute(&cmd, 1).await.unwrap(), 0);
    let entry = exec.registry().resolve(cmd.key());
    assert_eq!(entry.breaker().metrics().timeout, 1);
    assert_eq!(entry.bulkhead().in_flight(), 0);

    // Past the rolling horizon: the abandoned call never completed
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(entry.bulkhead().in_flight(), 0);
}

/// Remote for the half-open tests: input is `(delay_ms, succeed)`.
fn delayed_command(calls: &CallCounter) -> Command<(u64, bool), u64, RemoteError> {
    common::programmable_command("getUser", calls, |_, (delay_ms, ok): (u64, bool)| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if ok {
            Ok(delay_ms)
        } else {
            Err(RemoteError::Unavailable)
        }
    })
    .fallback_value(0)
}

#[tokio::test(start_paused = true)]
async fn test_call_admitted_before_trip_cannot_close_half_open() {
    // 1. Slow call admitted while the circuit is still closed
    let exec = common::executor_without_timeouts("getUser", common::sensitive_breaker(2, 1000));
    let calls = CallCounter::default();
    let cmd = delayed_command(&calls);
    let key = CommandKey::new("getUser");
    let straggler = exec.queue(&cmd, (1500, true));
    common::wait_for_calls(&calls, 1).await;

    // 2. Two quick failures trip the circuit
    exec.execute(&cmd, (0, false)).await.unwrap();
    exec.execute(&cmd, (0, false)).await.unwrap();
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));

    // 3. Sleep window elapses, a slow failing probe is granted
    tokio::time::advance(Duration::from_millis(1000)).await;
    let probe = exec.queue(&cmd, (2000, false));
    common::wait_for_calls(&calls, 4).await;
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::HalfOpen));

    // 4. The straggler succeeds while the probe is still out
    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(straggler.await.unwrap(), 1500);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::HalfOpen));

    // 5. Other callers stay short-circuited, even past another sleep window
    assert_eq!(exec.execute(&cmd, (0, true)).await.unwrap(), 0);
    tokio::time::advance(Duration::from_millis(1000)).await;
    assert_eq!(exec.execute(&cmd, (0, true)).await.unwrap(), 0);
    assert_eq!(calls.get(), 4);

    // 6. Only the probe's own failure decides: circuit re-opens
    assert_eq!(probe.await.unwrap(), 0);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_call_slower_than_sleep_window_keeps_single_slot() {
    let exec = common::executor_without_timeouts("getUser", common::sensitive_breaker(1, 500));
    let calls = CallCounter::default();
    let cmd = delayed_command(&calls);
    let key = CommandKey::new("getUser");

    exec.execute(&cmd, (0, false)).await.unwrap();
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));

    tokio::time::advance(Duration::from_millis(500)).await;
    let probe = exec.queue(&cmd, (3000, true));
    common::wait_for_calls(&calls, 2).await;

    // Several sleep windows pass while the probe runs
    for _ in 0..6 {
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(exec.execute(&cmd, (0, true)).await.unwrap(), 0);
    }
    assert_eq!(calls.get(), 2);

    assert_eq!(probe.await.unwrap(), 3000);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_half_open_call_frees_slot() {
    let exec = common::executor_without_timeouts("getUser", common::sensitive_breaker(1, 500));
    let calls = CallCounter::default();
    let cmd = delayed_command(&calls);
    let key = CommandKey::new("getUser");

    exec.execute(&cmd, (0, false)).await.unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;

    let probe = exec.queue(&cmd, (60_000, true));
    common::wait_for_calls(&calls, 2).await;
    probe.cancel();
    assert!(matches!(probe.await, Err(CommandError::Cancelled { .. })));
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Open));

    // The next caller becomes the probe without another sleep window
    assert_eq!(exec.execute(&cmd, (10, true)).await.unwrap(), 10);
    assert_eq!(exec.registry().circuit_state(&key), Some(CircuitState::Closed));
    assert_eq!(calls.get(), 3);
}

#[tokio::test]
async fn test_reload_forces_circuit_open() {
    let exec = common::executor_with_breaker("getUser", BreakerConfig::default());
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUser", &calls, |_, id: u64| async move { Ok(id) })
        .fallback_value(0);

    assert_eq!(exec.execute(&cmd, 5).await.unwrap(), 5);

    let mut reloaded = InvokerConfig::default();
    let mut command = CommandConfig::new("getUser");
    command.breaker = Some(BreakerConfig {
        force_open: true,
        ..Default::default()
    });
    reloaded.commands.push(command);
    exec.registry().apply(reloaded);

    assert_eq!(exec.execute(&cmd, 5).await.unwrap(), 0);
    assert_eq!(calls.get(), 1);
}

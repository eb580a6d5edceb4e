//! Request cache and collapser scenarios.

use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilient_call::config::{CollapserConfig, InvokerConfig};
use resilient_call::{
    with_scope, Collapser, CollapserError, CollapserSettings, CommandError, CommandExecutor, CommandKey,
};

mod common;
use common::{CallCounter, RemoteError};

fn cached_user_command(calls: &CallCounter) -> resilient_call::Command<u64, String, RemoteError> {
    common::programmable_command("getUserCache", calls, |_, id: u64| async move { Ok(format!("user-{id}")) })
        .cache_key(|id: &u64| id.to_string())
}

#[tokio::test]
async fn test_cache_three_lookups_one_invocation() {
    let exec = CommandExecutor::default();
    let calls = CallCounter::default();
    let cmd = cached_user_command(&calls);

    let results = with_scope(|scope| async move {
        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(scope.cached(&exec, &cmd, 1).await.unwrap());
        }
        results
    })
    .await;

    assert_eq!(results, vec!["user-1"; 3]);
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_remove_cache_forces_fresh_invocation() {
    let exec = CommandExecutor::default();
    let calls = CallCounter::default();
    let cmd = cached_user_command(&calls);
    let key = CommandKey::new("getUserCache");

    with_scope(|scope| async move {
        scope.cached(&exec, &cmd, 1).await.unwrap();
        assert!(scope.invalidate(&key, "1"));
        scope.cached(&exec, &cmd, 1).await.unwrap();
        scope.cached(&exec, &cmd, 1).await.unwrap();

        let metrics = exec.registry().metrics(&key).unwrap();
        assert_eq!(metrics.success, 2);
        assert_eq!(metrics.response_from_cache, 1);
    })
    .await;

    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn test_fallback_value_is_memoized() {
    let exec = CommandExecutor::default();
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUserCache", &calls, |_, _: u64| async {
        Err::<String, _>(RemoteError::Unavailable)
    })
    .fallback_value("default".to_string())
    .cache_key(|id: &u64| id.to_string());

    with_scope(|scope| async move {
        assert_eq!(scope.cached(&exec, &cmd, 9).await.unwrap(), "default");
        assert_eq!(scope.cached(&exec, &cmd, 9).await.unwrap(), "default");
    })
    .await;

    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_scope_ends_on_error_path() {
    let exec = CommandExecutor::default();
    let calls = CallCounter::default();
    let cmd = cached_user_command(&calls);

    let leaked = Arc::new(Mutex::new(None));
    let slot = leaked.clone();
    let result: Result<(), &str> = with_scope(|scope| async move {
        scope.cached(&exec, &cmd, 1).await.unwrap();
        *slot.lock().unwrap() = Some((scope.clone(), exec, cmd));
        Err("request failed")
    })
    .await;
    assert!(result.is_err());

    let (scope, exec, cmd) = leaked.lock().unwrap().take().unwrap();
    assert!(scope.is_closed());
    let err = scope.cached(&exec, &cmd, 1).await.unwrap_err();
    assert!(matches!(err, CommandError::ScopeClosed { .. }));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_collapse_within_timer_delay() {
    // 1. Collapser configured with a 100ms window
    let mut config = InvokerConfig::default();
    config.collapsers.push(CollapserConfig {
        key: "getUserByIds".into(),
        delay_ms: 100,
        max_batch_size: 100,
    });
    let exec = CommandExecutor::from_config(config);

    let calls = CallCounter::default();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let seen = batches.clone();
    let cmd = common::programmable_command("getUserByIds", &calls, move |_, ids: Vec<u64>| {
        seen.lock().unwrap().push(ids.clone());
        async move { Ok(ids.into_iter().map(|id| format!("user-{id}")).collect::<Vec<_>>()) }
    });
    let collapser = Collapser::from_config(exec, cmd);
    assert_eq!(collapser.settings().delay, Duration::from_millis(100));

    // 2. Users 1 and 2 land in the same window
    let (first, second) = tokio::join!(collapser.submit(1), collapser.submit(2));
    assert_eq!(first.unwrap(), "user-1");
    assert_eq!(second.unwrap(), "user-2");

    // 3. After the window closed, user 3 goes alone
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collapser.submit(3).await.unwrap(), "user-3");

    assert_eq!(calls.get(), 2);
    assert_eq!(*batches.lock().unwrap(), vec![vec![1, 2], vec![3]]);
}

#[tokio::test(start_paused = true)]
async fn test_many_items_resolved_in_position() {
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUserByIds", &calls, |_, ids: Vec<u64>| async move {
        Ok(ids.into_iter().map(|id| id * 100).collect::<Vec<_>>())
    });
    let collapser = Collapser::new(
        CommandExecutor::default(),
        cmd,
        CollapserSettings {
            delay: Duration::from_millis(50),
            max_batch_size: 16,
        },
    );

    let futures: Vec<_> = (0..40u64).map(|id| collapser.submit(id)).collect();
    let results = join_all(futures).await;

    for (id, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), id as u64 * 100);
    }
    // 16 + 16 by size, the last 8 by timer
    assert_eq!(collapser.batches_dispatched(), 3);
    assert_eq!(calls.get(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_shared_by_all_waiters() {
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUserByIds", &calls, |_, _: Vec<u64>| async {
        Err::<Vec<String>, _>(RemoteError::Unavailable)
    });
    let collapser = Collapser::new(CommandExecutor::default(), cmd, CollapserSettings::default());

    let results = join_all((1..=3).map(|id| collapser.submit(id))).await;
    let errors: Vec<_> = results
        .into_iter()
        .map(|r| match r {
            Err(CollapserError::BatchFailed(e)) => e,
            other => panic!("unexpected result: {other:?}"),
        })
        .collect();

    assert!(errors.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_fallback_serves_every_caller() {
    let calls = CallCounter::default();
    let cmd = common::programmable_command("getUserByIds", &calls, |_, _: Vec<u64>| async {
        Err::<Vec<String>, _>(RemoteError::Unavailable)
    })
    .fallback(|ids, _| async move { Ok(ids.iter().map(|_| "default".to_string()).collect()) });
    let collapser = Collapser::new(CommandExecutor::default(), cmd, CollapserSettings::default());

    let (a, b) = tokio::join!(collapser.submit(1), collapser.submit(2));
    assert_eq!(a.unwrap(), "default");
    assert_eq!(b.unwrap(), "default");
}

//! Simulated user service and the commands that call it.
//!
//! `RemoteUsers` stands in for the remote user service: an in-memory store
//! behind an artificial round trip that can be switched off to simulate an
//! outage. `UserService` wires one command per operation with the policies
//! the demo scenarios exercise.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use resilient_call::{with_scope, Collapser, CollapsedFuture, Command, CommandError, CommandExecutor, RequestScope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
}

impl User {
    pub fn new(id: i64, username: &str, password: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn fallback() -> Self {
        Self::new(-1, "default", "123456")
    }

    fn exception_fallback() -> Self {
        Self::new(-2, "default2", "123456")
    }
}

/// Response envelope of the user service.
#[derive(Debug, Clone, Serialize)]
pub struct CommonResult<T> {
    pub data: Option<T>,
    pub message: String,
    pub code: u16,
}

impl<T> CommonResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            message: "操作成功".to_string(),
            code: 200,
        }
    }

    pub fn message(message: &str) -> Self {
        Self {
            data: None,
            message: message.to_string(),
            code: 200,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("user service unavailable")]
    Unavailable,

    #[error("user {0} not found")]
    NotFound(i64),

    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("null pointer")]
    NullPointer,
}

/// In-memory stand-in for the remote user service.
#[derive(Debug)]
pub struct RemoteUsers {
    users: DashMap<i64, User>,
    available: AtomicBool,
    latency: Duration,
    calls: AtomicU64,
}

impl RemoteUsers {
    pub fn new(latency: Duration) -> Self {
        let users = DashMap::new();
        for (id, name) in [(1, "ly"), (2, "zy"), (3, "lyzzy")] {
            users.insert(id, User::new(id, name, "5211"));
        }
        Self {
            users,
            available: AtomicBool::new(true),
            latency,
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Round trips made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn round_trip(&self) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let base = self.latency.as_millis() as u64;
        let jitter = fastrand::u64(0..=base / 2);
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ServiceError::Unavailable)
        }
    }

    pub async fn get(&self, id: i64) -> Result<CommonResult<User>, ServiceError> {
        self.round_trip().await?;
        self.users
            .get(&id)
            .map(|user| CommonResult::ok(user.value().clone()))
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn get_by_ids(&self, ids: Vec<i64>) -> Result<Vec<User>, ServiceError> {
        self.round_trip().await?;
        tracing::info!(?ids, "getUserByIds");
        ids.into_iter()
            .map(|id| {
                self.users
                    .get(&id)
                    .map(|user| user.value().clone())
                    .ok_or(ServiceError::NotFound(id))
            })
            .collect()
    }

    pub async fn delete(&self, id: i64) -> Result<CommonResult<()>, ServiceError> {
        self.round_trip().await?;
        self.users.remove(&id);
        Ok(CommonResult::message("操作成功"))
    }
}

type UserCommand = Command<i64, CommonResult<User>, ServiceError>;

fn get_command(key: &'static str, remote: &Arc<RemoteUsers>) -> UserCommand {
    let remote = Arc::clone(remote);
    Command::new(key, move |id: i64| {
        let remote = Arc::clone(&remote);
        async move { remote.get(id).await }
    })
}

/// Client-side facade: every remote operation runs as a command.
pub struct UserService {
    executor: CommandExecutor,
    remote: Arc<RemoteUsers>,
    get_user: UserCommand,
    get_user_command: UserCommand,
    get_user_exception: UserCommand,
    get_user_cache: UserCommand,
    remove_cache: Command<i64, CommonResult<()>, ServiceError>,
    collapser: Collapser<i64, User, ServiceError>,
}

impl UserService {
    pub fn new(executor: CommandExecutor, remote: Arc<RemoteUsers>) -> Self {
        let default_user = CommonResult::ok(User::fallback());

        let get_user = get_command("getUser", &remote).fallback_value(default_user.clone());
        let get_user_command = get_command("getUserCommand", &remote).fallback_value(default_user.clone());
        let caching = Arc::clone(&remote);
        let get_user_cache = Command::new("getUserCache", move |id: i64| {
            let remote = Arc::clone(&caching);
            async move {
                tracing::info!(id, "getUserCache");
                remote.get(id).await
            }
        })
        .fallback_value(default_user)
        .cache_key(|id: &i64| id.to_string());

        let throwing = Arc::clone(&remote);
        let get_user_exception = Command::new("getUserException", move |id: i64| {
            let remote = Arc::clone(&throwing);
            async move {
                match id {
                    1 => Err(ServiceError::IndexOutOfBounds),
                    2 => Err(ServiceError::NullPointer),
                    _ => remote.get(id).await,
                }
            }
        })
        .ignore_errors(|e| matches!(e, ServiceError::NullPointer))
        .fallback(|id, cause| async move {
            tracing::error!(id, cause = %cause.kind(), error = ?cause.error(), "getDefaultUser2");
            Ok(CommonResult::ok(User::exception_fallback()))
        });

        let deleting = Arc::clone(&remote);
        let remove_cache = Command::new("removeCache", move |id: i64| {
            let remote = Arc::clone(&deleting);
            async move { remote.delete(id).await }
        });

        let batching = Arc::clone(&remote);
        let get_user_by_ids = Command::new("getUserByIds", move |ids: Vec<i64>| {
            let remote = Arc::clone(&batching);
            async move { remote.get_by_ids(ids).await }
        });
        let collapser = Collapser::from_config(executor.clone(), get_user_by_ids);

        Self {
            executor,
            remote,
            get_user,
            get_user_command,
            get_user_exception,
            get_user_cache,
            remove_cache,
            collapser,
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn remote(&self) -> &Arc<RemoteUsers> {
        &self.remote
    }

    pub fn collapser(&self) -> &Collapser<i64, User, ServiceError> {
        &self.collapser
    }

    pub async fn get_user(&self, id: i64) -> Result<CommonResult<User>, CommandError<ServiceError>> {
        self.executor.execute(&self.get_user, id).await
    }

    pub async fn get_user_command(&self, id: i64) -> Result<CommonResult<User>, CommandError<ServiceError>> {
        self.executor.execute(&self.get_user_command, id).await
    }

    pub async fn get_user_exception(&self, id: i64) -> Result<CommonResult<User>, CommandError<ServiceError>> {
        self.executor.execute(&self.get_user_exception, id).await
    }

    pub async fn get_user_cache(
        &self,
        scope: &RequestScope,
        id: i64,
    ) -> Result<CommonResult<User>, CommandError<ServiceError>> {
        scope.cached(&self.executor, &self.get_user_cache, id).await
    }

    /// Delete the user remotely, then drop its cached entry from `scope`.
    /// A failed delete leaves the entry in place.
    pub async fn remove_cache(
        &self,
        scope: &RequestScope,
        id: i64,
    ) -> Result<CommonResult<()>, CommandError<ServiceError>> {
        tracing::info!(id, "removeCache");
        let result = self.executor.execute(&self.remove_cache, id).await?;
        scope.invalidate(self.get_user_cache.key(), &id.to_string());
        Ok(result)
    }

    pub fn get_future_user(&self, id: i64) -> CollapsedFuture<User, ServiceError> {
        self.collapser.submit(id)
    }

    /// Three cached lookups of the same user inside one request.
    pub async fn test_cache(&self, id: i64) -> Result<u64, CommandError<ServiceError>> {
        let before = self.remote.calls();
        with_scope(|scope| async move {
            for _ in 0..3 {
                self.get_user_cache(&scope, id).await?;
            }
            Ok::<_, CommandError<ServiceError>>(self.remote.calls() - before)
        })
        .await
    }

    /// Cached lookup, removal, then two more cached lookups inside one request.
    pub async fn test_remove_cache(&self, id: i64) -> Result<u64, CommandError<ServiceError>> {
        let before = self.remote.calls();
        with_scope(|scope| async move {
            self.get_user_cache(&scope, id).await?;
            self.remove_cache(&scope, id).await?;
            self.get_user_cache(&scope, id).await?;
            self.get_user_cache(&scope, id).await?;
            Ok::<_, CommandError<ServiceError>>(self.remote.calls() - before)
        })
        .await
    }
}

//! Request-scoped result cache.
//!
//! # Responsibilities
//! - Memoize command results per `(command key, cache key)` inside one scope
//! - Share a single in-flight execution between concurrent callers of a key
//! - Drop every entry when the scope ends
//!
//! # Design Decisions
//! - The scope is an explicit value handed to the caller, never ambient state
//! - Only successful results (including fallback values) are memoized
//! - The map lock is never held across an await

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::command::definition::Command;
use crate::command::error::CommandError;
use crate::command::executor::CommandExecutor;
use crate::command::key::CommandKey;

type Slot = Arc<dyn Any + Send + Sync>;

/// One request's cache. Cloning shares the same store.
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: Uuid,
    closed: AtomicBool,
    entries: Mutex<HashMap<(CommandKey, String), Slot>>,
}

/// Run `f` inside a fresh request scope.
///
/// The scope is closed and cleared when this returns, errors, panics or is
/// cancelled. Clones of the scope that escape `f` fail with `ScopeClosed`.
pub async fn with_scope<F, Fut, R>(f: F) -> R
where
    F: FnOnce(RequestScope) -> Fut,
    Fut: Future<Output = R>,
{
    let scope = RequestScope::new();
    let _guard = ScopeGuard(scope.clone());
    f(scope).await
}

struct ScopeGuard(RequestScope);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl RequestScope {
    pub(crate) fn new() -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner {
                id: Uuid::new_v4(),
                closed: AtomicBool::new(false),
                entries: Mutex::new(HashMap::new()),
            }),
        };
        tracing::trace!(scope = %scope.id(), "Request scope opened");
        scope
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of memoized entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute `command` through the cache.
    ///
    /// A hit returns the memoized value and is recorded as a response from
    /// cache. Commands without a cache key function always execute.
    pub async fn cached<I, T, E>(
        &self,
        executor: &CommandExecutor,
        command: &Command<I, T, E>,
        input: I,
    ) -> Result<T, CommandError<E>>
    where
        I: Clone + Send + 'static,
        T: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
    {
        let Some(cache_key) = command.cache_key_for(&input) else {
            return executor.execute(command, input).await;
        };
        let cell = self
            .cell::<T>(command.key(), cache_key)
            .ok_or_else(|| CommandError::ScopeClosed {
                key: command.key().clone(),
                scope: self.id(),
            })?;

        let mut executed = false;
        let value = cell
            .get_or_try_init(|| {
                executed = true;
                executor.execute(command, input)
            })
            .await?;

        if !executed {
            executor.record_cache_hit(command.key());
            tracing::trace!(command = %command.key(), scope = %self.id(), "Response from cache");
        }
        Ok(value.clone())
    }

    /// Remove a memoized entry. Returns whether one was present.
    pub fn invalidate(&self, key: &CommandKey, cache_key: &str) -> bool {
        let removed = self
            .entries()
            .remove(&(key.clone(), cache_key.to_string()))
            .is_some();
        tracing::debug!(command = %key, cache_key, scope = %self.id(), removed, "Cache entry invalidated");
        removed
    }

    fn cell<T>(&self, key: &CommandKey, cache_key: String) -> Option<Arc<OnceCell<T>>>
    where
        T: Send + Sync + 'static,
    {
        if self.is_closed() {
            return None;
        }
        let mut entries = self.entries();
        let slot = entries.entry((key.clone(), cache_key)).or_insert_with(|| {
            let fresh: Slot = Arc::new(OnceCell::<T>::new());
            fresh
        });

        match Arc::clone(slot).downcast::<OnceCell<T>>() {
            Ok(cell) => Some(cell),
            Err(_) => {
                tracing::debug!(command = %key, "Cache entry held another type, replacing");
                let cell = Arc::new(OnceCell::new());
                *slot = cell.clone();
                Some(cell)
            }
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut entries = self.entries();
        let dropped = entries.len();
        entries.clear();
        tracing::trace!(scope = %self.id(), dropped, "Request scope closed");
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(CommandKey, String), Slot>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

//! Command definitions.
//!
//! A command is an explicit registration tuple: the remote operation, its
//! optional fallback, the errors to pass through untouched and the request
//! cache key derivation. Nothing is looked up by name at runtime.

use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::command::error::FallbackCause;
use crate::command::key::CommandKey;

type RunFn<I, T, E> = dyn Fn(I) -> BoxFuture<'static, Result<T, E>> + Send + Sync;
type FallbackFn<I, T, E> = dyn Fn(I, FallbackCause<E>) -> BoxFuture<'static, Result<T, E>> + Send + Sync;
type IgnoreFn<E> = dyn Fn(&E) -> bool + Send + Sync;
type CacheKeyFn<I> = dyn Fn(&I) -> String + Send + Sync;

/// A remote operation wrapped with its resilience policy.
///
/// Cloning is cheap; all closures are shared.
pub struct Command<I, T, E> {
    key: CommandKey,
    run: Arc<RunFn<I, T, E>>,
    fallback: Option<Arc<FallbackFn<I, T, E>>>,
    ignore: Option<Arc<IgnoreFn<E>>>,
    cache_key: Option<Arc<CacheKeyFn<I>>>,
    timeout: Option<Duration>,
}

impl<I, T, E> Command<I, T, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wrap `run` under `key`.
    pub fn new<F, Fut>(key: impl Into<CommandKey>, run: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            key: key.into(),
            run: Arc::new(move |input| run(input).boxed()),
            fallback: None,
            ignore: None,
            cache_key: None,
            timeout: None,
        }
    }

    /// Substitute used when the primary path is denied or fails.
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(I, FallbackCause<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |input, cause| fallback(input, cause).boxed()));
        self
    }

    /// Fallback that always returns a fixed value.
    pub fn fallback_value(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        self.fallback(move |_, _| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Errors matching `predicate` bypass fallback and breaker accounting.
    pub fn ignore_errors<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.ignore = Some(Arc::new(predicate));
        self
    }

    /// Derive the request cache key from the input.
    pub fn cache_key<K>(mut self, derive: K) -> Self
    where
        K: Fn(&I) -> String + Send + Sync + 'static,
    {
        self.cache_key = Some(Arc::new(derive));
        self
    }

    /// Override the configured deadline for this command.
    pub fn timeout(mut self, after: Duration) -> Self {
        self.timeout = Some(after);
        self
    }
}

impl<I, T, E> Command<I, T, E> {
    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_ignored(&self, error: &E) -> bool {
        self.ignore.as_ref().is_some_and(|ignore| ignore(error))
    }

    pub fn cache_key_for(&self, input: &I) -> Option<String> {
        self.cache_key.as_ref().map(|derive| derive(input))
    }

    pub(crate) fn call(&self, input: I) -> BoxFuture<'static, Result<T, E>> {
        (self.run)(input)
    }

    /// Start the fallback, or hand the cause back when there is none.
    pub(crate) fn call_fallback(
        &self,
        input: I,
        cause: FallbackCause<E>,
    ) -> Result<BoxFuture<'static, Result<T, E>>, FallbackCause<E>> {
        match &self.fallback {
            Some(fallback) => Ok(fallback(input, cause)),
            None => Err(cause),
        }
    }
}

impl<I, T, E> Clone for Command<I, T, E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            run: Arc::clone(&self.run),
            fallback: self.fallback.clone(),
            ignore: self.ignore.clone(),
            cache_key: self.cache_key.clone(),
            timeout: self.timeout,
        }
    }
}

impl<I, T, E> fmt::Debug for Command<I, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("has_fallback", &self.fallback.is_some())
            .field("has_cache_key", &self.cache_key.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_wires_policy() {
        let cmd: Command<u64, String, String> = Command::new("getUserCache", |id: u64| async move {
            Ok(format!("user-{id}"))
        })
        .fallback_value("default".to_string())
        .ignore_errors(|e: &String| e == "null")
        .cache_key(|id: &u64| id.to_string())
        .timeout(Duration::from_millis(250));

        assert_eq!(cmd.key().as_str(), "getUserCache");
        assert!(cmd.has_fallback());
        assert!(cmd.is_ignored(&"null".to_string()));
        assert!(!cmd.is_ignored(&"index".to_string()));
        assert_eq!(cmd.cache_key_for(&7).as_deref(), Some("7"));
        assert_eq!(cmd.timeout_override(), Some(Duration::from_millis(250)));

        assert_eq!(cmd.call(3).await.unwrap(), "user-3");
        let fallback = cmd.call_fallback(3, FallbackCause::ShortCircuited).unwrap();
        assert_eq!(fallback.await.unwrap(), "default");
    }

    #[test]
    fn test_defaults_are_bare() {
        let cmd: Command<(), (), String> = Command::new("bare", |_| async { Ok(()) });
        assert!(!cmd.has_fallback());
        assert!(!cmd.is_ignored(&String::new()));
        assert!(cmd.cache_key_for(&()).is_none());
        assert!(cmd.clone().timeout_override().is_none());
    }
}

//! Request collapsing.
//!
//! # Responsibilities
//! - Accumulate single-item requests into a batch window
//! - Flush on delay expiry or when the window reaches its size limit
//! - Run the batch as a command and hand each caller its own result
//!
//! # Data Flow
//! ```text
//! submit(item)
//!     → no open window: open one, spawn its timer
//!     → append (item, responder)
//!     → size limit reached: take window, abort timer, dispatch
//! timer fires
//!     → window id still current: take window, dispatch
//! dispatch
//!     → executor.execute(batch_command, items)
//!     → Ok(results), same length: results[i] → responder[i]
//!     → otherwise every responder rejected with the same error
//! ```
//!
//! # Design Decisions
//! - A window is moved out of the slot on flush; late items open a new one
//! - One timer per window, identified by window id
//! - Dropping a `CollapsedFuture` never cancels the batch

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::command::definition::Command;
use crate::command::error::CommandError;
use crate::command::executor::CommandExecutor;
use crate::command::key::CommandKey;
use crate::config::schema::CollapserConfig;
use crate::observability::metrics;

/// Why a collapsed request produced no result.
#[derive(Debug, Error)]
pub enum CollapserError<E> {
    /// The batch command failed; every caller in the batch shares this error.
    #[error("batch failed: {0}")]
    BatchFailed(Arc<CommandError<E>>),

    /// The batch returned a different number of results than it was given.
    #[error("batch returned {actual} results for {expected} items")]
    ResultCountMismatch { expected: usize, actual: usize },

    /// The batch was abandoned before it produced a result for this caller.
    #[error("batch dropped before completing")]
    Dropped,
}

/// Window timing and size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapserSettings {
    pub delay: Duration,
    pub max_batch_size: usize,
}

impl Default for CollapserSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(10),
            max_batch_size: 100,
        }
    }
}

impl From<&CollapserConfig> for CollapserSettings {
    fn from(config: &CollapserConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.delay_ms),
            max_batch_size: config.max_batch_size.max(1),
        }
    }
}

type Responder<R, E> = oneshot::Sender<Result<R, CollapserError<E>>>;

struct BatchWindow<A, R, E> {
    id: u64,
    items: Vec<A>,
    responders: Vec<Responder<R, E>>,
    timer: JoinHandle<()>,
}

/// Merges concurrent single-item requests into batch command executions.
///
/// Cloning is cheap; clones share the open window.
pub struct Collapser<A, R, E> {
    inner: Arc<Inner<A, R, E>>,
}

struct Inner<A, R, E> {
    executor: CommandExecutor,
    command: Command<Vec<A>, Vec<R>, E>,
    settings: CollapserSettings,
    window: Mutex<Option<BatchWindow<A, R, E>>>,
    next_window: AtomicU64,
    batches: AtomicU64,
}

impl<A, R, E> Collapser<A, R, E>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new(
        executor: CommandExecutor,
        command: Command<Vec<A>, Vec<R>, E>,
        settings: CollapserSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                command,
                settings,
                window: Mutex::new(None),
                next_window: AtomicU64::new(0),
                batches: AtomicU64::new(0),
            }),
        }
    }

    /// Build with the settings configured for the batch command's key,
    /// falling back to defaults.
    pub fn from_config(executor: CommandExecutor, command: Command<Vec<A>, Vec<R>, E>) -> Self {
        let settings = executor
            .registry()
            .config()
            .collapser(command.key().as_str())
            .map(CollapserSettings::from)
            .unwrap_or_default();
        Self::new(executor, command, settings)
    }

    pub fn key(&self) -> &CommandKey {
        self.inner.command.key()
    }

    pub fn settings(&self) -> CollapserSettings {
        self.inner.settings
    }

    /// Batches dispatched so far.
    pub fn batches_dispatched(&self) -> u64 {
        self.inner.batches.load(Ordering::Relaxed)
    }

    /// Items waiting in the open window.
    pub fn pending(&self) -> usize {
        self.inner.lock_window().as_ref().map_or(0, |w| w.items.len())
    }

    /// Add `item` to the open batch window.
    pub fn submit(&self, item: A) -> CollapsedFuture<R, E> {
        let (tx, rx) = oneshot::channel();

        let full = {
            let mut slot = self.inner.lock_window();
            let window = slot.get_or_insert_with(|| self.inner.open_window());
            window.items.push(item);
            window.responders.push(tx);
            if window.items.len() >= self.inner.settings.max_batch_size {
                slot.take()
            } else {
                None
            }
        };

        if let Some(window) = full {
            window.timer.abort();
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.dispatch(window).await });
        }

        CollapsedFuture { rx }
    }
}

impl<A, R, E> Inner<A, R, E>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    fn lock_window(&self) -> MutexGuard<'_, Option<BatchWindow<A, R, E>>> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_window(self: &Arc<Self>) -> BatchWindow<A, R, E> {
        let id = self.next_window.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        let delay = self.settings.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let expired = {
                let mut slot = inner.lock_window();
                if slot.as_ref().is_some_and(|window| window.id == id) {
                    slot.take()
                } else {
                    None
                }
            };
            if let Some(window) = expired {
                inner.dispatch(window).await;
            }
        });

        tracing::trace!(collapser = %self.command.key(), window = id, "Batch window opened");
        BatchWindow {
            id,
            items: Vec::new(),
            responders: Vec::new(),
            timer,
        }
    }

    async fn dispatch(&self, window: BatchWindow<A, R, E>) {
        let BatchWindow {
            id,
            items,
            responders,
            ..
        } = window;
        let key = self.command.key();
        let expected = items.len();

        self.batches.fetch_add(1, Ordering::Relaxed);
        metrics::record_batch(key, expected);
        tracing::debug!(collapser = %key, window = id, size = expected, "Dispatching batch");

        match self.executor.execute(&self.command, items).await {
            Ok(results) if results.len() == expected => {
                for (responder, result) in responders.into_iter().zip(results) {
                    let _ = responder.send(Ok(result));
                }
            }
            Ok(results) => {
                let actual = results.len();
                tracing::warn!(collapser = %key, window = id, expected, actual, "Batch result count mismatch");
                for responder in responders {
                    let _ = responder.send(Err(CollapserError::ResultCountMismatch { expected, actual }));
                }
            }
            Err(error) => {
                tracing::warn!(collapser = %key, window = id, size = expected, error = %error, "Batch failed");
                let error = Arc::new(error);
                for responder in responders {
                    let _ = responder.send(Err(CollapserError::BatchFailed(Arc::clone(&error))));
                }
            }
        }
    }
}

impl<A, R, E> Clone for Collapser<A, R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R, E> fmt::Debug for Collapser<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collapser")
            .field("key", self.inner.command.key())
            .field("settings", &self.inner.settings)
            .field("batches", &self.inner.batches.load(Ordering::Relaxed))
            .finish()
    }
}

/// The result of one collapsed item.
#[derive(Debug)]
pub struct CollapsedFuture<R, E> {
    rx: oneshot::Receiver<Result<R, CollapserError<E>>>,
}

impl<R, E> Future for CollapsedFuture<R, E> {
    type Output = Result<R, CollapserError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CollapserError::Dropped)),
        }
    }
}

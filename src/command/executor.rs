//! Command executor.
//!
//! # Data Flow
//! ```text
//! execute(command, input)
//!     → breaker.admit()                denied → ShortCircuited → fallback
//!     → with_deadline(
//!           bulkhead.acquire()         full   → Rejected       → fallback
//!           command.call(input))       expiry → Timeout        → fallback
//!     → Ok                             → Success
//!     → Err, ignored                   → Ignored, surfaced untouched
//!     → Err                            → Failure        → fallback
//! fallback
//!     → none configured                → original error surfaced
//!     → Ok / Err                       → FallbackSuccess / FallbackFailure
//! ```
//!
//! Every primary outcome is reported on the command's breaker exactly once,
//! through the admission it was granted. Only a half-open probe's own
//! outcome can close or reopen the circuit.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::command::definition::Command;
use crate::command::error::{CommandError, FallbackCause};
use crate::command::key::CommandKey;
use crate::command::outcome::ExecutionOutcome;
use crate::command::registry::{CommandEntry, CommandRegistry};
use crate::config::schema::InvokerConfig;
use crate::observability::metrics;
use crate::resilience::bulkhead::BulkheadRejected;
use crate::resilience::circuit_breaker::Admission;
use crate::resilience::timeouts::{with_deadline, DeadlineExceeded};

/// Runs commands under their breaker, bulkhead and deadline.
///
/// Cloning is cheap; clones share the registry.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    registry: Arc<CommandRegistry>,
}

impl CommandExecutor {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn from_config(config: InvokerConfig) -> Self {
        Self::new(Arc::new(CommandRegistry::new(config)))
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Run `command` inline and return its final result.
    pub async fn execute<I, T, E>(
        &self,
        command: &Command<I, T, E>,
        input: I,
    ) -> Result<T, CommandError<E>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let entry = self.registry.resolve(command.key());
        let started = Instant::now();
        let fallback_input = command.has_fallback().then(|| input.clone());

        let admission = entry.breaker().admit();
        let cause = if !admission.is_permitted() {
            self.record(&entry, admission, ExecutionOutcome::ShortCircuited, started);
            tracing::debug!(command = %command.key(), "Circuit open, short-circuiting");
            FallbackCause::ShortCircuited
        } else {
            let deadline = command.timeout_override().or_else(|| entry.timeout());
            let bulkhead = entry.bulkhead();
            let run = with_deadline(deadline, async {
                let permit = bulkhead.acquire().await?;
                let result = command.call(input).await;
                bulkhead.release(permit);
                Ok::<_, BulkheadRejected>(result)
            })
            .await;

            match run {
                Err(DeadlineExceeded { after }) => {
                    self.record(&entry, admission, ExecutionOutcome::Timeout, started);
                    tracing::warn!(
                        command = %command.key(),
                        timeout_ms = after.as_millis() as u64,
                        "Command timed out"
                    );
                    FallbackCause::Timeout(after)
                }
                Ok(Err(rejected)) => {
                    self.record(&entry, admission, ExecutionOutcome::Rejected, started);
                    tracing::warn!(
                        command = %command.key(),
                        group = %rejected.group,
                        in_flight = rejected.in_flight,
                        "Command rejected by bulkhead"
                    );
                    FallbackCause::Rejected(rejected)
                }
                Ok(Ok(Ok(value))) => {
                    self.record(&entry, admission, ExecutionOutcome::Success, started);
                    return Ok(value);
                }
                Ok(Ok(Err(error))) if command.is_ignored(&error) => {
                    self.record(&entry, admission, ExecutionOutcome::Ignored, started);
                    tracing::debug!(command = %command.key(), error = %error, "Ignored error passed through");
                    return Err(CommandError::Ignored {
                        key: command.key().clone(),
                        source: error,
                    });
                }
                Ok(Ok(Err(error))) => {
                    self.record(&entry, admission, ExecutionOutcome::Failure, started);
                    tracing::debug!(command = %command.key(), error = %error, "Command failed");
                    FallbackCause::Failure(error)
                }
            }
        };

        self.run_fallback(command, &entry, fallback_input, cause).await
    }

    async fn run_fallback<I, T, E>(
        &self,
        command: &Command<I, T, E>,
        entry: &CommandEntry,
        input: Option<I>,
        cause: FallbackCause<E>,
    ) -> Result<T, CommandError<E>>
    where
        E: fmt::Display,
    {
        let key = command.key().clone();
        let Some(input) = input else {
            return Err(cause.into_error(key));
        };

        let kind = cause.kind();
        let fallback = match command.call_fallback(input, cause) {
            Ok(fallback) => fallback,
            Err(cause) => return Err(cause.into_error(key)),
        };

        match fallback.await {
            Ok(value) => {
                self.mark(entry, ExecutionOutcome::FallbackSuccess);
                tracing::debug!(command = %key, cause = %kind, "Fallback served");
                Ok(value)
            }
            Err(source) => {
                self.mark(entry, ExecutionOutcome::FallbackFailure);
                tracing::warn!(command = %key, cause = %kind, error = %source, "Fallback failed");
                Err(CommandError::FallbackFailure {
                    key,
                    cause: kind,
                    source,
                })
            }
        }
    }

    /// Spawn `command` on the runtime and return a handle to its result.
    pub fn queue<I, T, E>(&self, command: &Command<I, T, E>, input: I) -> CommandFuture<T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let executor = self.clone();
        let command = command.clone();
        let key = command.key().clone();
        let handle = tokio::spawn(async move { executor.execute(&command, input).await });
        CommandFuture { key, handle }
    }

    /// Spawn `command` and discard its result; failures are logged.
    pub fn fire_and_forget<I, T, E>(&self, command: &Command<I, T, E>, input: I)
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let executor = self.clone();
        let command = command.clone();
        tokio::spawn(async move {
            if let Err(error) = executor.execute(&command, input).await {
                tracing::warn!(command = %command.key(), error = %error, "Fire-and-forget command failed");
            }
        });
    }

    /// Count a request cache hit against the command.
    pub(crate) fn record_cache_hit(&self, key: &CommandKey) {
        let entry = self.registry.resolve(key);
        self.mark(&entry, ExecutionOutcome::ResponseFromCache);
    }

    fn record(&self, entry: &CommandEntry, admission: Admission<'_>, outcome: ExecutionOutcome, started: Instant) {
        admission.report(outcome);
        metrics::record_outcome(entry.key(), outcome);
        metrics::record_latency(entry.key(), started.elapsed());
    }

    fn mark(&self, entry: &CommandEntry, outcome: ExecutionOutcome) {
        entry.breaker().mark(outcome);
        metrics::record_outcome(entry.key(), outcome);
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(Arc::new(CommandRegistry::default()))
    }
}

/// Result of a queued command.
///
/// Dropping the future detaches the task; `cancel` aborts it.
#[derive(Debug)]
pub struct CommandFuture<T, E> {
    key: CommandKey,
    handle: JoinHandle<Result<T, CommandError<E>>>,
}

impl<T, E> CommandFuture<T, E> {
    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    /// Abort the execution. The future then resolves to `Cancelled` unless
    /// the command had already completed.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T, E> Future for CommandFuture<T, E> {
    type Output = Result<T, CommandError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommandError::Cancelled {
                key: this.key.clone(),
            })),
        }
    }
}

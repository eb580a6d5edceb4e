//! Command error taxonomy.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::command::key::CommandKey;
use crate::command::outcome::ExecutionOutcome;
use crate::resilience::bulkhead::BulkheadRejected;

/// Why the primary path was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Failure,
    Timeout,
    ShortCircuited,
    Rejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Failure => "remote failure",
            FailureKind::Timeout => "timeout",
            FailureKind::ShortCircuited => "short-circuit",
            FailureKind::Rejected => "bulkhead rejection",
        };
        f.write_str(label)
    }
}

/// Handed to a fallback: the reason it is running, with the original error
/// when there is one.
#[derive(Debug)]
pub enum FallbackCause<E> {
    Failure(E),
    Timeout(Duration),
    ShortCircuited,
    Rejected(BulkheadRejected),
}

impl<E> FallbackCause<E> {
    pub fn kind(&self) -> FailureKind {
        match self {
            FallbackCause::Failure(_) => FailureKind::Failure,
            FallbackCause::Timeout(_) => FailureKind::Timeout,
            FallbackCause::ShortCircuited => FailureKind::ShortCircuited,
            FallbackCause::Rejected(_) => FailureKind::Rejected,
        }
    }

    /// The error raised by the operation, if it raised one.
    pub fn error(&self) -> Option<&E> {
        match self {
            FallbackCause::Failure(e) => Some(e),
            _ => None,
        }
    }

    /// The error surfaced to the caller when no fallback is configured.
    pub fn into_error(self, key: CommandKey) -> CommandError<E> {
        match self {
            FallbackCause::Failure(source) => CommandError::RemoteFailure { key, source },
            FallbackCause::Timeout(after) => CommandError::Timeout { key, after },
            FallbackCause::ShortCircuited => CommandError::ShortCircuited { key },
            FallbackCause::Rejected(source) => CommandError::Rejected { key, source },
        }
    }
}

/// Final error of a command invocation.
///
/// `Ignored` and `FallbackFailure` are always surfaced. The other primary
/// failures only reach the caller when the command has no fallback.
#[derive(Debug, Error)]
pub enum CommandError<E> {
    /// The operation failed and no fallback is configured.
    #[error("command {key} failed: {source}")]
    RemoteFailure { key: CommandKey, source: E },

    /// The deadline passed and no fallback is configured.
    #[error("command {key} timed out after {after:?}")]
    Timeout { key: CommandKey, after: Duration },

    /// The circuit denied execution and no fallback is configured.
    #[error("command {key} short-circuited: circuit is open")]
    ShortCircuited { key: CommandKey },

    /// The bulkhead was saturated and no fallback is configured.
    #[error("command {key} rejected: {source}")]
    Rejected { key: CommandKey, source: BulkheadRejected },

    /// The operation raised an error classified as ignored; passed through untouched.
    #[error("command {key} raised an ignored error: {source}")]
    Ignored { key: CommandKey, source: E },

    /// The fallback itself failed. Never retried.
    #[error("fallback for command {key} failed after {cause}: {source}")]
    FallbackFailure {
        key: CommandKey,
        cause: FailureKind,
        source: E,
    },

    /// A queued command was cancelled before it completed.
    #[error("command {key} was cancelled")]
    Cancelled { key: CommandKey },

    /// The request scope backing the cache has already ended.
    #[error("command {key} used request scope {scope} after it closed")]
    ScopeClosed { key: CommandKey, scope: Uuid },
}

impl<E> CommandError<E> {
    pub fn key(&self) -> &CommandKey {
        match self {
            CommandError::RemoteFailure { key, .. }
            | CommandError::Timeout { key, .. }
            | CommandError::ShortCircuited { key }
            | CommandError::Rejected { key, .. }
            | CommandError::Ignored { key, .. }
            | CommandError::FallbackFailure { key, .. }
            | CommandError::Cancelled { key }
            | CommandError::ScopeClosed { key, .. } => key,
        }
    }

    /// The outcome this error was recorded as, if any.
    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        match self {
            CommandError::RemoteFailure { .. } => Some(ExecutionOutcome::Failure),
            CommandError::Timeout { .. } => Some(ExecutionOutcome::Timeout),
            CommandError::ShortCircuited { .. } => Some(ExecutionOutcome::ShortCircuited),
            CommandError::Rejected { .. } => Some(ExecutionOutcome::Rejected),
            CommandError::Ignored { .. } => Some(ExecutionOutcome::Ignored),
            CommandError::FallbackFailure { .. } => Some(ExecutionOutcome::FallbackFailure),
            CommandError::Cancelled { .. } | CommandError::ScopeClosed { .. } => None,
        }
    }

    /// The application error carried by this variant, if any.
    pub fn into_source(self) -> Option<E> {
        match self {
            CommandError::RemoteFailure { source, .. }
            | CommandError::Ignored { source, .. }
            | CommandError::FallbackFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_cause_without_fallback_maps_to_error() {
        let key = CommandKey::new("getUser");
        let err = FallbackCause::<Boom>::Timeout(Duration::from_millis(5)).into_error(key.clone());
        assert!(matches!(err, CommandError::Timeout { .. }));
        assert_eq!(err.outcome(), Some(ExecutionOutcome::Timeout));

        let err = FallbackCause::Failure(Boom).into_error(key);
        assert_eq!(err.to_string(), "command getUser failed: boom");
        assert!(err.into_source().is_some());
    }

    #[test]
    fn test_fallback_failure_message() {
        let err = CommandError::FallbackFailure {
            key: CommandKey::new("getUser"),
            cause: FailureKind::ShortCircuited,
            source: Boom,
        };
        assert_eq!(
            err.to_string(),
            "fallback for command getUser failed after short-circuit: boom"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Execution outcomes recorded into the rolling metrics window.

use serde::{Deserialize, Serialize};

/// Result classification of one command invocation.
///
/// `Ignored` and `ResponseFromCache` are neutral events: they are counted but
/// never feed the breaker's error rate.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success = 0,
    Failure = 1,
    Timeout = 2,
    ShortCircuited = 3,
    Rejected = 4,
    FallbackSuccess = 5,
    FallbackFailure = 6,
    Ignored = 7,
    ResponseFromCache = 8,
}

impl ExecutionOutcome {
    /// Number of distinct outcomes (one counter each per bucket).
    pub const COUNT: usize = 9;

    pub const ALL: [ExecutionOutcome; Self::COUNT] = [
        ExecutionOutcome::Success,
        ExecutionOutcome::Failure,
        ExecutionOutcome::Timeout,
        ExecutionOutcome::ShortCircuited,
        ExecutionOutcome::Rejected,
        ExecutionOutcome::FallbackSuccess,
        ExecutionOutcome::FallbackFailure,
        ExecutionOutcome::Ignored,
        ExecutionOutcome::ResponseFromCache,
    ];

    /// Counter slot for this outcome.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Outcomes that count toward the breaker's error rate.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Failure | ExecutionOutcome::Timeout | ExecutionOutcome::Rejected
        )
    }

    /// Outcomes that count toward the breaker's request volume.
    pub fn is_health_event(self) -> bool {
        self == ExecutionOutcome::Success || self.is_error()
    }

    /// Metric label for this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::Timeout => "timeout",
            ExecutionOutcome::ShortCircuited => "short_circuited",
            ExecutionOutcome::Rejected => "rejected",
            ExecutionOutcome::FallbackSuccess => "fallback_success",
            ExecutionOutcome::FallbackFailure => "fallback_failure",
            ExecutionOutcome::Ignored => "ignored",
            ExecutionOutcome::ResponseFromCache => "response_from_cache",
        }
    }
}

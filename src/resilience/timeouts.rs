//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap command executions with a deadline
//! - Cancel the in-flight operation cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; expiry drops the wrapped future, which
//!   also drops any bulkhead permit it holds
//! - Timeout errors are distinct from operation errors

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The deadline passed before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {after:?} exceeded")]
pub struct DeadlineExceeded {
    pub after: Duration,
}

/// Run `fut` under `deadline`; `None` waits indefinitely.
pub async fn with_deadline<F>(deadline: Option<Duration>, fut: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| DeadlineExceeded { after }),
        None => Ok(fut.await),
    }
}

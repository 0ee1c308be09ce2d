//! Retry policy for failed file operations
//!
//! Operations that can fail on I/O (renders, cache fills) report their
//! failures instead of prompting anyone. The caller decides what happens
//! next through a [`RetryPolicy`]: try again, give up, or carry on with the
//! degraded result.

use crate::error::{IoFailure, Result};
use tracing::{debug, warn};

/// Decision for a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Run the operation again
    Retry,
    /// Abandon the operation
    Cancel,
    /// Keep the result as it is
    Proceeded,
}

/// Decides what to do after an operation reported failures
pub trait RetryPolicy {
    /// `attempt` counts from 1 for the first run
    fn on_failure(&mut self, failure: &IoFailure, attempt: u32) -> RetryOutcome;
}

impl<F> RetryPolicy for F
where
    F: FnMut(&IoFailure, u32) -> RetryOutcome,
{
    fn on_failure(&mut self, failure: &IoFailure, attempt: u32) -> RetryOutcome {
        self(failure, attempt)
    }
}

/// Retry up to `attempts` runs in total, then proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAttempts(pub u32);

impl RetryPolicy for MaxAttempts {
    fn on_failure(&mut self, _failure: &IoFailure, attempt: u32) -> RetryOutcome {
        if attempt < self.0 {
            RetryOutcome::Retry
        } else {
            RetryOutcome::Proceeded
        }
    }
}

/// Run `op` until it reports no failures or `policy` stops it
///
/// `op` receives the attempt number and returns its value with the failures
/// it met. The first failure of each attempt is put to the policy. Returns
/// the value of the last attempt with `Proceeded`, or `Cancel` when the
/// policy gave up. Errors from `op` end the loop immediately.
pub fn with_retry<T, F>(policy: &mut dyn RetryPolicy, mut op: F) -> Result<(T, RetryOutcome)>
where
    F: FnMut(u32) -> Result<(T, Vec<IoFailure>)>,
{
    let mut attempt = 1;
    loop {
        let (value, failures) = op(attempt)?;
        let Some(failure) = failures.first() else {
            return Ok((value, RetryOutcome::Proceeded));
        };
        match policy.on_failure(failure, attempt) {
            RetryOutcome::Retry => {
                debug!("Attempt {} failed ({}), retrying", attempt, failure);
                attempt += 1;
            }
            RetryOutcome::Cancel => {
                warn!("Cancelled after attempt {}: {}", attempt, failure);
                return Ok((value, RetryOutcome::Cancel));
            }
            RetryOutcome::Proceeded => {
                warn!(
                    "Proceeding with {} failure(s) after attempt {}: {}",
                    failures.len(),
                    attempt,
                    failure
                );
                return Ok((value, RetryOutcome::Proceeded));
            }
        }
    }
}

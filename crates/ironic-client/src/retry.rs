//! Bounded retries for transient request failures
//!
//! Each attempt reports an [`Attempt`]; only [`Attempt::Retriable`] outcomes are
//! sent again, after a fixed interval, until the budget is spent.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{IronicError, Result};

/// Retries used when the budget leaves them unset
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Pause between attempts when the budget leaves it unset
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a single attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retriable(IronicError),
    Fatal(IronicError),
}

impl<T> From<Result<T>> for Attempt<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Done(value),
            Err(e) if e.is_retriable() => Self::Retriable(e),
            Err(e) => Self::Fatal(e),
        }
    }
}

/// How often and how far apart a request may be retried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Retries after the first attempt; [`DEFAULT_MAX_RETRIES`] when unset
    pub max_retries: Option<u32>,

    /// Pause between attempts; [`DEFAULT_RETRY_INTERVAL`] when unset
    pub retry_interval: Option<Duration>,
}

impl RetryBudget {
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            retry_interval: Some(retry_interval),
        }
    }

    /// A budget that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Copy with unset fields replaced by their defaults
    pub fn resolved(self) -> Self {
        Self {
            max_retries: Some(self.max_retries()),
            retry_interval: Some(self.retry_interval()),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL)
    }

    /// Run `op` until it is done, fails fatally, or the budget is spent
    ///
    /// `op` receives the 1-based attempt number. The last retriable error is
    /// returned unchanged once `max_retries + 1` attempts have failed.
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let total = self.max_retries().saturating_add(1);
        let interval = self.retry_interval();
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retriable(e) if attempt >= total => {
                    error!(
                        "Request failed after {} attempt(s), giving up: {}",
                        attempt, e
                    );
                    return Err(e);
                }
                Attempt::Retriable(e) => {
                    debug!(
                        "Attempt {} of {} failed: {}; retrying in {:?}",
                        attempt, total, e, interval
                    );
                    tokio::time::sleep(interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

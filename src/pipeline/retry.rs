//! Per-step retry budget and cancellable scheduling ticks.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{Error, Result};

/// Sleep for `duration` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] on cancellation.
pub(crate) async fn tick(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Retry budget of one step of one iteration.
#[derive(Debug)]
pub(crate) struct Retry {
    step: &'static str,
    budget: u32,
    used: u32,
    interval: Duration,
    cancel: CancellationToken,
}

impl Retry {
    pub(crate) const fn new(
        step: &'static str,
        budget: u32,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            step,
            budget,
            used: 0,
            interval,
            cancel,
        }
    }

    /// Whether another attempt is allowed.
    pub(crate) const fn can_retry(&self) -> bool {
        self.used < self.budget
    }

    /// Spend one retry and wait one tick.
    pub(crate) async fn wait(&mut self, reason: &str) -> Result<()> {
        self.used += 1;
        warn!(
            step = self.step,
            attempt = self.used,
            budget = self.budget,
            reason,
            "retrying on next tick"
        );
        tick(self.interval, &self.cancel).await
    }

    /// Handle a failed attempt: wait and return `Ok` if the error is
    /// retryable and budget remains, otherwise return the error to escalate.
    pub(crate) async fn backoff(&mut self, error: Error) -> Result<()> {
        if !error.is_retryable() {
            return Err(error);
        }
        if !self.can_retry() {
            return Err(Error::permanent(format!(
                "{} still failing after {} retries: {error}",
                self.step, self.budget
            )));
        }
        self.wait(&error.to_string()).await
    }
}

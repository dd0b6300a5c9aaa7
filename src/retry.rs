//! Bounded backoff retry for failed reconfigurations
//!
//! A retry episode runs in response to exactly one reported watcher
//! error. Attempt state is local to the episode, so back-to-back
//! episodes never inherit a stale counter. Exhausting the budget is
//! logged, never escalated: the controller keeps running on the last
//! successfully applied configuration.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Linear-backoff retry policy: attempt `n` sleeps `n × backoff`
/// before rebuilding.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay applied before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// Run one retry episode against `rebuild`.
    ///
    /// The episode ends at the first successful rebuild or once
    /// `max_retries` attempts have failed. Re-applying an
    /// already-applied configuration only adds reload churn, so there
    /// is no point finishing out the budget after a success.
    pub async fn run<F, Fut>(&self, mut rebuild: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        for attempt in 1..=self.max_retries {
            let delay = self.delay_for(attempt);
            info!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying reconfiguration"
            );
            tokio::time::sleep(delay).await;

            match rebuild().await {
                Ok(()) => {
                    info!(attempt, "reconfiguration applied");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconfiguration attempt failed");
                }
            }
        }

        warn!(
            max_retries = self.max_retries,
            "giving up on reconfiguration until the next update"
        );
    }
}

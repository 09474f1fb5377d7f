use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::delivery::Delivery;
use crate::domain::{CandidateItem, DeliveryOutcome};

/// Bounded exponential backoff around a single item's delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Final outcome of an item together with how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub outcome: DeliveryOutcome,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Wait after the `failed_attempts`-th consecutive failure:
    /// `base_delay * 2^(failed_attempts - 1)`, capped at `max_delay`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Wait before retrying `outcome`: the backoff, stretched to any
    /// server-provided `retry_after`, never beyond `max_delay`.
    pub fn delay_for(&self, failed_attempts: u32, outcome: &DeliveryOutcome) -> Duration {
        let backoff = self.backoff(failed_attempts);
        match outcome.retry_after() {
            Some(hint) => backoff.max(hint).min(self.max_delay),
            None => backoff,
        }
    }

    /// Deliver `item`, retrying retriable failures up to `max_attempts`.
    ///
    /// A cancelled token ends the backoff wait early and returns the last
    /// failure; an attempt already in flight is always allowed to finish.
    pub async fn deliver(
        &self,
        delivery: &dyn Delivery,
        item: &CandidateItem,
        cancel: &CancellationToken,
    ) -> DeliveryAttempt {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = delivery.deliver(item).await;

            if !outcome.is_retriable() || attempts >= self.max_attempts {
                return DeliveryAttempt { outcome, attempts };
            }

            let delay = self.delay_for(attempts, &outcome);
            if let DeliveryOutcome::Failed { reason, .. } = &outcome {
                warn!(
                    "Delivery of {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    item.link, attempts, self.max_attempts, reason, delay
                );
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return DeliveryAttempt { outcome, attempts },
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

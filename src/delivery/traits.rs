use async_trait::async_trait;

use crate::domain::{CandidateItem, DeliveryOutcome};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Make one attempt to hand the item to the downstream service
    async fn deliver(&self, item: &CandidateItem) -> DeliveryOutcome;
}

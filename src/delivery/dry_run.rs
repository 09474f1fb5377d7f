use async_trait::async_trait;
use tracing::info;

use crate::delivery::traits::Delivery;
use crate::domain::{CandidateItem, DeliveryOutcome};

/// Reports what would be saved without contacting the downstream service.
#[derive(Debug, Default)]
pub struct DryRunDelivery;

#[async_trait]
impl Delivery for DryRunDelivery {
    async fn deliver(&self, item: &CandidateItem) -> DeliveryOutcome {
        info!("[DRY RUN] would save {} ({})", item.title, item.link);
        DeliveryOutcome::skipped("dry run")
    }
}

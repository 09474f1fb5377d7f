use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delivery::Delivery;
use crate::domain::{
    CandidateItem, DeliveryOutcome, FeedConfig, FeedCycleReport, FeedStatus, ItemFailure,
};
use crate::services::retry::RetryPolicy;
use crate::sources::FeedSource;
use crate::storage::SeenStore;

/// Runs the fetch, dedupe and deliver steps for one feed.
pub struct FeedProcessor {
    source: Arc<dyn FeedSource>,
    delivery: Arc<dyn Delivery>,
    retry: RetryPolicy,
}

impl FeedProcessor {
    pub fn new(
        source: Arc<dyn FeedSource>,
        delivery: Arc<dyn Delivery>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            delivery,
            retry,
        }
    }

    /// Process one feed to completion.
    ///
    /// Only items the delivery confirmed (plus first-sight backfill) are
    /// marked seen. Failures are recorded in the report and never stop the
    /// remaining items.
    pub async fn process(
        &self,
        feed: &FeedConfig,
        store: &SeenStore,
        cancel: &CancellationToken,
    ) -> FeedCycleReport {
        let identity = feed.identity();

        let entries = match self.source.fetch(&feed.url).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Error fetching feed {}: {}", feed.name, e);
                return FeedCycleReport::fetch_failed(feed, e.to_string());
            }
        };

        let mut report = FeedCycleReport::new(feed);
        report.fetched = entries.len();

        let candidates = dedupe(
            entries
                .into_iter()
                .filter_map(|entry| CandidateItem::from_entry(feed, entry)),
        );

        let first_sight = store.seen_count(identity) == 0;
        let unseen: Vec<CandidateItem> = candidates
            .into_iter()
            .filter(|item| !store.has_seen(identity, &item.item_id))
            .collect();
        report.new = unseen.len();

        let to_deliver = if first_sight {
            let (deliver, backfill) = split_first_sight(unseen, feed.max_items_on_first_sight);
            if !backfill.is_empty() {
                info!(
                    "New feed detected: {}. Delivering the latest {} items, skipping {} older ones",
                    feed.name,
                    deliver.len(),
                    backfill.len()
                );
            }
            for item in &backfill {
                store.mark_seen(identity, &item.item_id);
            }
            report.backfilled = backfill.len();
            deliver
        } else {
            unseen
        };

        for item in to_deliver {
            if cancel.is_cancelled() {
                info!("Shutdown requested, stopping feed {}", feed.name);
                report.status = FeedStatus::Interrupted;
                break;
            }

            if store.has_seen(identity, &item.item_id) {
                continue;
            }

            let attempt = self
                .retry
                .deliver(self.delivery.as_ref(), &item, cancel)
                .await;

            match attempt.outcome {
                DeliveryOutcome::Delivered => {
                    store.mark_seen(identity, &item.item_id);
                    report.delivered += 1;
                }
                DeliveryOutcome::Skipped { reason } => {
                    debug!("Skipped {}: {}", item.link, reason);
                    report.skipped += 1;
                }
                DeliveryOutcome::Failed { reason, .. } => {
                    warn!(
                        "Failed to deliver {} after {} attempt(s): {}",
                        item.link, attempt.attempts, reason
                    );
                    report.failed += 1;
                    report.failures.push(ItemFailure {
                        title: item.title,
                        link: item.link,
                        reason,
                        attempts: attempt.attempts,
                    });
                }
            }
        }

        if report.delivered > 0 {
            info!("Delivered {} new items from {}", report.delivered, feed.name);
        } else {
            debug!("No new items delivered from {}", feed.name);
        }

        report
    }
}

/// Keep the first occurrence of each item id, preserving document order.
fn dedupe(items: impl Iterator<Item = CandidateItem>) -> Vec<CandidateItem> {
    let mut ids = HashSet::new();
    items.filter(|item| ids.insert(item.item_id.clone())).collect()
}

/// Split a new feed's items into the ones to deliver and the backfill.
///
/// The `cap` most recent items are delivered, by publication date when
/// every item has one and by document order otherwise. Both halves keep
/// document order.
fn split_first_sight(
    items: Vec<CandidateItem>,
    cap: usize,
) -> (Vec<CandidateItem>, Vec<CandidateItem>) {
    if items.len() <= cap {
        return (items, Vec::new());
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    if items.iter().all(|item| item.published_at.is_some()) {
        // Stable sort: equal dates keep document order
        order.sort_by(|&a, &b| items[b].published_at.cmp(&items[a].published_at));
    }
    let keep: HashSet<usize> = order.into_iter().take(cap).collect();

    let mut deliver = Vec::with_capacity(cap);
    let mut backfill = Vec::with_capacity(items.len() - cap);
    for (index, item) in items.into_iter().enumerate() {
        if keep.contains(&index) {
            deliver.push(item);
        } else {
            backfill.push(item);
        }
    }

    (deliver, backfill)
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::FeedConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FeedStatus {
    Completed,
    FetchFailed(String),
    /// Shutdown was requested before every candidate was handled
    Interrupted,
    /// The feed's task died before producing a report
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub title: String,
    pub link: String,
    pub reason: String,
    pub attempts: u32,
}

/// What happened to one feed during one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedCycleReport {
    pub feed_name: String,
    pub feed_identity: String,
    pub status: FeedStatus,
    pub fetched: usize,
    pub new: usize,
    pub delivered: usize,
    pub failed: usize,
    pub backfilled: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl FeedCycleReport {
    pub fn new(feed: &FeedConfig) -> Self {
        Self {
            feed_name: feed.name.clone(),
            feed_identity: feed.identity().to_string(),
            status: FeedStatus::Completed,
            fetched: 0,
            new: 0,
            delivered: 0,
            failed: 0,
            backfilled: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn fetch_failed(feed: &FeedConfig, reason: impl Into<String>) -> Self {
        Self {
            status: FeedStatus::FetchFailed(reason.into()),
            ..Self::new(feed)
        }
    }

    pub fn aborted(feed: &FeedConfig, reason: impl Into<String>) -> Self {
        Self {
            status: FeedStatus::Aborted(reason.into()),
            ..Self::new(feed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FlushStatus {
    Persisted,
    Failed(String),
    Skipped,
}

/// Aggregate of one pass over all configured feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feeds: Vec<FeedCycleReport>,
    pub flush: FlushStatus,
    pub interrupted: bool,
}

impl CycleReport {
    pub fn total_fetched(&self) -> usize {
        self.feeds.iter().map(|f| f.fetched).sum()
    }

    pub fn total_new(&self) -> usize {
        self.feeds.iter().map(|f| f.new).sum()
    }

    pub fn total_delivered(&self) -> usize {
        self.feeds.iter().map(|f| f.delivered).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.feeds.iter().map(|f| f.failed).sum()
    }

    pub fn total_backfilled(&self) -> usize {
        self.feeds.iter().map(|f| f.backfilled).sum()
    }

    pub fn failed_feeds(&self) -> usize {
        self.feeds
            .iter()
            .filter(|f| {
                matches!(
                    f.status,
                    FeedStatus::FetchFailed(_) | FeedStatus::Aborted(_)
                )
            })
            .count()
    }
}

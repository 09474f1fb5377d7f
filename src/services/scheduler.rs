//! Periodic cycles over every configured feed.
//!
//! A cycle fans out one task per feed, bounded by a semaphore, and flushes
//! the seen ledger once every task has finished. Only one cycle runs at a
//! time; a second request while one is in flight is rejected.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{CycleReport, FeedConfig, FeedCycleReport, FeedStatus, FlushStatus};
use crate::errors::{FeedbagError, FeedbagResult};
use crate::services::processor::FeedProcessor;
use crate::storage::SeenStore;

/// Feeds fetched and delivered at the same time when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Marks a cycle as running for as long as it is alive.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    feeds: Vec<FeedConfig>,
    processor: Arc<FeedProcessor>,
    store: Arc<SeenStore>,
    concurrency: usize,
    persist: bool,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(feeds: Vec<FeedConfig>, processor: FeedProcessor, store: Arc<SeenStore>) -> Self {
        Self {
            feeds,
            processor: Arc::new(processor),
            store,
            concurrency: DEFAULT_CONCURRENCY,
            persist: true,
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Maximum number of feeds processed at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Never write the ledger. Used for dry runs.
    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    fn begin_cycle(&self) -> FeedbagResult<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FeedbagError::CycleInProgress)?;
        Ok(CycleGuard(&self.running))
    }

    /// Run one cycle over every feed and flush the ledger.
    ///
    /// Feed failures, including a panicking feed task, are recorded in the
    /// report. A flush failure is recorded too; items delivered in this cycle
    /// stay marked in memory and the next flush retries the write.
    pub async fn run_once(&self) -> FeedbagResult<CycleReport> {
        let _guard = self.begin_cycle()?;
        let started_at = Utc::now();
        info!("Starting cycle over {} feed(s)", self.feeds.len());

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(self.feeds.len());

        for feed in &self.feeds {
            let task_feed = feed.clone();
            let processor = Arc::clone(&self.processor);
            let store = Arc::clone(&self.store);
            let cancel = self.shutdown.clone();
            let permits = Arc::clone(&permits);

            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                Some(processor.process(&task_feed, &store, &cancel).await)
            });
            tasks.push((feed, handle));
        }

        let mut feeds = Vec::with_capacity(tasks.len());
        for (feed, handle) in tasks {
            let report = match handle.await {
                Ok(Some(report)) => report,
                Ok(None) => FeedCycleReport {
                    status: FeedStatus::Interrupted,
                    ..FeedCycleReport::new(feed)
                },
                Err(e) => {
                    let reason = abort_reason(e);
                    error!("Processing of feed {} aborted: {}", feed.name, reason);
                    FeedCycleReport::aborted(feed, reason)
                }
            };
            feeds.push(report);
        }

        let flush = if self.persist {
            match self.store.flush() {
                Ok(()) => FlushStatus::Persisted,
                Err(e) => {
                    error!("{}", e);
                    FlushStatus::Failed(e.to_string())
                }
            }
        } else {
            FlushStatus::Skipped
        };

        let interrupted = self.shutdown.is_cancelled()
            || feeds.iter().any(|f| f.status == FeedStatus::Interrupted);

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            feeds,
            flush,
            interrupted,
        };

        info!(
            "Cycle finished: {} fetched, {} new, {} delivered, {} failed, {} backfilled, {} feed(s) unreachable",
            report.total_fetched(),
            report.total_new(),
            report.total_delivered(),
            report.total_failed(),
            report.total_backfilled(),
            report.failed_feeds()
        );

        Ok(report)
    }

    /// Run a cycle every `interval` until the shutdown token is cancelled.
    ///
    /// The first cycle starts immediately. Ticks missed while a cycle runs
    /// long are dropped rather than queued. The ledger is flushed one last
    /// time on the way out.
    pub async fn run_forever(&self, interval: Duration) -> FeedbagResult<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Checking feeds every {:?}", interval);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(_) => {}
                Err(FeedbagError::CycleInProgress) => {
                    warn!("Previous cycle still running, skipping this tick")
                }
                Err(e) => error!("Cycle failed: {}", e),
            }
        }

        info!("Shutting down");
        if self.persist {
            self.store.flush()?;
        }
        Ok(())
    }
}

fn abort_reason(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        Err(e) => e.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Delivery;
    use crate::domain::{CandidateItem, DeliveryOutcome, FeedEntry};
    use crate::errors::FetchError;
    use crate::services::RetryPolicy;
    use crate::sources::FeedSource;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Serves canned entries per url. Unknown urls fail, "panic" urls panic.
    #[derive(Default)]
    struct FakeSource {
        feeds: HashMap<String, Vec<FeedEntry>>,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn with_feed(mut self, url: &str, count: usize) -> Self {
            let entries = (0..count)
                .map(|i| {
                    FeedEntry::new(format!("Post {}", i))
                        .with_id(Some(format!("{}#{}", url, i)))
                        .with_link(Some(format!("{}/posts/{}", url, i)))
                })
                .collect();
            self.feeds.insert(url.to_string(), entries);
            self
        }
    }

    #[async_trait]
    impl FeedSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if url.contains("panic") {
                panic!("malformed feed");
            }
            self.feeds
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Permanent("404 Not Found".to_string()))
        }
    }

    /// Blocks every fetch until released.
    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FeedSource for GatedSource {
        async fn fetch(&self, _url: &str) -> Result<Vec<FeedEntry>, FetchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    /// Every fetch takes `delay`; tracks how many overlap.
    struct SlowSource {
        delay: Duration,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fetches: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FeedSource for SlowSource {
        async fn fetch(&self, _url: &str) -> Result<Vec<FeedEntry>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingDelivery {
        links: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn deliver(&self, item: &CandidateItem) -> DeliveryOutcome {
            self.links.lock().unwrap().push(item.link.clone());
            DeliveryOutcome::Delivered
        }
    }

    /// Requests shutdown while handing over its first item.
    struct CancellingDelivery {
        shutdown: CancellationToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Delivery for CancellingDelivery {
        async fn deliver(&self, _item: &CandidateItem) -> DeliveryOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.shutdown.cancel();
            }
            DeliveryOutcome::Delivered
        }
    }

    fn feed(url: &str) -> FeedConfig {
        FeedConfig::new(url, url)
    }

    fn scheduler(
        feeds: Vec<FeedConfig>,
        source: Arc<dyn FeedSource>,
        delivery: Arc<dyn Delivery>,
        store: Arc<SeenStore>,
    ) -> Scheduler {
        let processor = FeedProcessor::new(source, delivery, RetryPolicy::default());
        Scheduler::new(feeds, processor, store)
    }

    fn store_in(dir: &TempDir) -> Arc<SeenStore> {
        Arc::new(SeenStore::empty(dir.path().join("seen_items.json")))
    }

    #[tokio::test]
    async fn test_failing_feed_does_not_affect_others() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::default().with_feed("https://a.example.com", 2));
        let delivery = Arc::new(RecordingDelivery::default());
        let store = store_in(&dir);

        let scheduler = scheduler(
            vec![feed("https://missing.example.com"), feed("https://a.example.com")],
            source,
            delivery.clone(),
            store.clone(),
        );
        let report = scheduler.run_once().await.unwrap();

        assert!(matches!(report.feeds[0].status, FeedStatus::FetchFailed(_)));
        assert_eq!(report.feeds[1].status, FeedStatus::Completed);
        assert_eq!(report.total_delivered(), 2);
        assert_eq!(report.flush, FlushStatus::Persisted);
        assert_eq!(delivery.links.lock().unwrap().len(), 2);

        let reloaded = SeenStore::load(store.path()).unwrap();
        assert_eq!(reloaded.seen_count("https://a.example.com"), 2);
    }

    #[tokio::test]
    async fn test_panicking_feed_is_reported_as_aborted() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::default().with_feed("https://a.example.com", 1));
        let delivery = Arc::new(RecordingDelivery::default());

        let scheduler = scheduler(
            vec![feed("https://panic.example.com"), feed("https://a.example.com")],
            source,
            delivery.clone(),
            store_in(&dir),
        );
        let report = scheduler.run_once().await.unwrap();

        match &report.feeds[0].status {
            FeedStatus::Aborted(reason) => assert!(reason.contains("malformed feed")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(report.feeds[1].delivered, 1);
        assert_eq!(report.flush, FlushStatus::Persisted);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(GatedSource::default());
        let scheduler = Arc::new(scheduler(
            vec![feed("https://a.example.com")],
            source.clone(),
            Arc::new(RecordingDelivery::default()),
            store_in(&dir),
        ));

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_once().await })
        };
        source.entered.notified().await;

        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(matches!(
            scheduler.run_once().await,
            Err(FeedbagError::CycleInProgress)
        ));

        source.release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(SlowSource::new(Duration::from_secs(1)));
        let feeds = (0..5)
            .map(|i| feed(&format!("https://{}.example.com", i)))
            .collect();

        let scheduler = scheduler(
            feeds,
            source.clone(),
            Arc::new(RecordingDelivery::default()),
            store_in(&dir),
        )
        .with_concurrency(2);
        let report = scheduler.run_once().await.unwrap();

        assert_eq!(report.feeds.len(), 5);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_cycle_skips_feeds() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::default().with_feed("https://a.example.com", 3));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let scheduler = scheduler(
            vec![feed("https://a.example.com")],
            source.clone(),
            Arc::new(RecordingDelivery::default()),
            store_in(&dir),
        )
        .with_shutdown(shutdown);
        let report = scheduler.run_once().await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.feeds[0].status, FeedStatus::Interrupted);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_mid_cycle_keeps_delivered_items() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = Arc::new(
            FakeSource::default()
                .with_feed("https://a.example.com", 2)
                .with_feed("https://b.example.com", 2),
        );
        let shutdown = CancellationToken::new();
        let delivery = Arc::new(CancellingDelivery {
            shutdown: shutdown.clone(),
            calls: AtomicUsize::new(0),
        });

        let scheduler = scheduler(
            vec![feed("https://a.example.com"), feed("https://b.example.com")],
            source,
            delivery.clone(),
            store.clone(),
        )
        .with_concurrency(1)
        .with_shutdown(shutdown);
        let report = scheduler.run_once().await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.total_delivered(), 1);
        assert_eq!(delivery.calls.load(Ordering::SeqCst), 1);
        assert!(report.feeds.iter().all(|f| f.status == FeedStatus::Interrupted));
        assert_eq!(report.flush, FlushStatus::Persisted);

        // The item handed over before shutdown survives a restart
        let reloaded = SeenStore::load(store.path()).unwrap();
        let seen = reloaded.seen_count("https://a.example.com")
            + reloaded.seen_count("https://b.example.com");
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_without_persistence_skips_flush() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let scheduler = scheduler(
            vec![feed("https://a.example.com")],
            Arc::new(FakeSource::default().with_feed("https://a.example.com", 1)),
            Arc::new(RecordingDelivery::default()),
            store.clone(),
        )
        .without_persistence();

        let report = scheduler.run_once().await.unwrap();

        assert_eq!(report.flush, FlushStatus::Skipped);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_flush_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let store = Arc::new(SeenStore::empty(blocker.join("seen_items.json")));

        let scheduler = scheduler(
            vec![feed("https://a.example.com")],
            Arc::new(FakeSource::default().with_feed("https://a.example.com", 1)),
            Arc::new(RecordingDelivery::default()),
            store.clone(),
        );
        let report = scheduler.run_once().await.unwrap();

        assert!(matches!(report.flush, FlushStatus::Failed(_)));
        assert_eq!(report.total_delivered(), 1);
        // Still marked in memory for the next flush
        assert_eq!(store.seen_count("https://a.example.com"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_forever_ticks_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::default().with_feed("https://a.example.com", 1));
        let store = store_in(&dir);
        let scheduler = scheduler(
            vec![feed("https://a.example.com")],
            source.clone(),
            Arc::new(RecordingDelivery::default()),
            store.clone(),
        );
        let shutdown = scheduler.shutdown_token();

        let task = tokio::spawn(async move { scheduler.run_forever(Duration::from_secs(60)).await });

        // Cycles at 0s, 60s and 120s
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert!(store.path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_cycle_skips_missed_ticks() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(SlowSource::new(Duration::from_secs(150)));
        let scheduler = scheduler(
            vec![feed("https://a.example.com")],
            source.clone(),
            Arc::new(RecordingDelivery::default()),
            store_in(&dir),
        );
        let shutdown = scheduler.shutdown_token();

        let task = tokio::spawn(async move { scheduler.run_forever(Duration::from_secs(60)).await });

        // Cycles start at 0s, 150s and 300s; the ticks they overran are dropped
        tokio::time::sleep(Duration::from_secs(400)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }
}

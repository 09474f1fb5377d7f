use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use feedbag::cli::{Cli, Commands};
use feedbag::config::{load_feeds, Config};
use feedbag::delivery::{Delivery, DryRunDelivery, WallabagDelivery};
use feedbag::domain::{CycleReport, FeedConfig, FeedStatus, FlushStatus};
use feedbag::logging;
use feedbag::services::{FeedProcessor, Scheduler};
use feedbag::sources::RssAtomSource;
use feedbag::storage::SeenStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    logging::init(&config.log_level);

    match cli.command {
        Commands::Feeds => cmd_feeds(&config),
        Commands::Once { dry_run, json } => cmd_once(&config, dry_run, json).await,
        Commands::Run { interval_minutes } => cmd_run(&config, interval_minutes).await,
    }
}

fn cmd_feeds(config: &Config) -> anyhow::Result<()> {
    let feeds = load_feeds(&config.feeds_file, config.default_fetch_count)?;

    if feeds.is_empty() {
        println!("No feeds configured.");
        return Ok(());
    }

    println!("Configured feeds:\n");
    for feed in feeds {
        println!("  {}", feed.name);
        println!("    URL: {}", feed.url);
        if !feed.tags.is_empty() {
            let tags: Vec<&str> = feed.tags.iter().map(String::as_str).collect();
            println!("    Tags: {}", tags.join(", "));
        }
        println!(
            "    First check: latest {} items",
            feed.max_items_on_first_sight
        );
        println!();
    }

    Ok(())
}

async fn cmd_once(config: &Config, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let Some(scheduler) = build_scheduler(config, dry_run)? else {
        println!("No feeds configured.");
        return Ok(());
    };

    if dry_run && !json {
        println!("Running in dry-run mode: nothing will be saved.\n");
    }
    shutdown_on_ctrl_c(scheduler.shutdown_token());

    let report = scheduler.run_once().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, dry_run);
    }

    if let FlushStatus::Failed(reason) = &report.flush {
        bail!("seen items were not saved: {}", reason);
    }

    Ok(())
}

async fn cmd_run(config: &Config, interval_minutes: Option<u64>) -> anyhow::Result<()> {
    let Some(scheduler) = build_scheduler(config, false)? else {
        println!("No feeds configured.");
        return Ok(());
    };

    let interval = interval_minutes
        .map(|minutes| Duration::from_secs(minutes * 60))
        .unwrap_or(config.interval);

    shutdown_on_ctrl_c(scheduler.shutdown_token());
    scheduler.run_forever(interval).await?;

    Ok(())
}

/// Wire up the pipeline, or `None` when there is nothing to watch.
///
/// The seen ledger is loaded before anything else so a corrupt ledger stops
/// the process before any item can be delivered twice.
fn build_scheduler(config: &Config, dry_run: bool) -> anyhow::Result<Option<Scheduler>> {
    let feeds: Vec<FeedConfig> = load_feeds(&config.feeds_file, config.default_fetch_count)?;
    let store = SeenStore::load(&config.seen_file)
        .context("refusing to start without a readable seen ledger")?;

    if feeds.is_empty() {
        return Ok(None);
    }

    info!(
        "Loaded {} feed(s), seen ledger at {}",
        feeds.len(),
        config.seen_file.display()
    );

    let delivery: Arc<dyn Delivery> = if dry_run {
        Arc::new(DryRunDelivery)
    } else {
        Arc::new(WallabagDelivery::from_config(config)?)
    };
    let source = Arc::new(RssAtomSource::new(config.http_timeout));
    let processor = FeedProcessor::new(source, delivery, config.retry_policy());

    let scheduler = Scheduler::new(feeds, processor, Arc::new(store))
        .with_concurrency(config.feed_concurrency);

    Ok(Some(if dry_run {
        scheduler.without_persistence()
    } else {
        scheduler
    }))
}

fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight deliveries");
            shutdown.cancel();
        }
    });
}

fn print_report(report: &CycleReport, dry_run: bool) {
    for feed in &report.feeds {
        match &feed.status {
            FeedStatus::FetchFailed(reason) => {
                println!("{}: could not fetch feed: {}", feed.feed_name, reason);
                continue;
            }
            FeedStatus::Aborted(reason) => {
                println!("{}: aborted: {}", feed.feed_name, reason);
                continue;
            }
            FeedStatus::Completed | FeedStatus::Interrupted => {}
        }

        println!(
            "{} ({} fetched, {} new):",
            feed.feed_name, feed.fetched, feed.new
        );
        if feed.backfilled > 0 {
            println!("  Skipped {} older items on first check", feed.backfilled);
        }
        for failure in &feed.failures {
            println!(
                "  FAILED: {} after {} attempt(s): {}",
                failure.link, failure.attempts, failure.reason
            );
        }
        if feed.status == FeedStatus::Interrupted {
            println!("  Interrupted");
        }
    }
    println!();

    if dry_run {
        let would_save: usize = report.feeds.iter().map(|f| f.skipped).sum();
        println!("Dry run complete. Would save {} items.", would_save);
    } else {
        println!(
            "Saved {} items, {} failed.",
            report.total_delivered(),
            report.total_failed()
        );
    }
}

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "feedbag")]
#[command(about = "Watches RSS/Atom feeds and saves new items to Wallabag")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check all feeds periodically until interrupted
    Run {
        /// Minutes between cycles (overrides INTERVAL_MINUTES)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_minutes: Option<u64>,
    },

    /// Run a single cycle and print a summary
    Once {
        /// Dry run - don't save anything, just show what would be saved
        #[arg(long)]
        dry_run: bool,

        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured feeds
    Feeds,
}

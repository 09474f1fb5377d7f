//! Loading of the feed list (`feeds.json`).
//!
//! ```json
//! { "feeds": [ { "name": "Rust Blog", "url": "https://blog.rust-lang.org/feed.xml",
//!                "tags": ["rust"], "max_items": 5 } ] }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::domain::FeedConfig;
use crate::errors::{FeedbagError, FeedbagResult};

#[derive(Debug, Deserialize)]
struct FeedsFile {
    #[serde(default)]
    feeds: Vec<RawFeed>,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tags: Option<RawTags>,
    #[serde(default)]
    max_items: Option<usize>,
}

/// Tags may be given as a list or as a comma separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<String>),
    Csv(String),
}

impl RawTags {
    fn into_vec(self) -> Vec<String> {
        let tags = match self {
            RawTags::List(list) => list,
            RawTags::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        };
        tags.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Read the feed list from `path`. A missing file means no feeds.
pub fn load_feeds(path: &Path, default_max_items: usize) -> FeedbagResult<Vec<FeedConfig>> {
    if !path.exists() {
        warn!("Feeds file not found: {}", path.display());
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    parse_feeds(&content, default_max_items)
        .map_err(|e| FeedbagError::Config(format!("{}: {}", path.display(), e)))
}

/// Parse a feed list document. Entries without a usable http(s) URL and
/// repeated URLs are skipped with a warning.
pub fn parse_feeds(content: &str, default_max_items: usize) -> FeedbagResult<Vec<FeedConfig>> {
    let file: FeedsFile = serde_json::from_str(content)?;

    let mut seen_urls = HashSet::new();
    let mut feeds = Vec::with_capacity(file.feeds.len());

    for raw in file.feeds {
        let url = match raw.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => {
                warn!("Feed config missing URL: {:?}", raw.name);
                continue;
            }
        };

        match Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                warn!("Skipping feed with invalid URL: {}", url);
                continue;
            }
        }

        if !seen_urls.insert(url.clone()) {
            warn!("Skipping duplicate feed URL: {}", url);
            continue;
        }

        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| url.clone());

        let tags = raw.tags.map(RawTags::into_vec).unwrap_or_default();

        feeds.push(
            FeedConfig::new(name, url)
                .with_tags(tags)
                .with_max_items_on_first_sight(raw.max_items.unwrap_or(default_max_items)),
        );
    }

    Ok(feeds)
}

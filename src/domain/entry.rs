use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::FeedConfig;

/// A raw entry as read from a feed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Feed-provided guid, if any
    pub id: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            link: None,
            published: None,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link;
        self
    }

    pub fn with_published(mut self, published: Option<DateTime<Utc>>) -> Self {
        self.published = published;
        self
    }
}

/// An entry that is a candidate for delivery during one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateItem {
    pub feed_identity: String,
    pub item_id: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
}

impl CandidateItem {
    /// Returns `None` for entries without a link, which cannot be saved.
    pub fn from_entry(feed: &FeedConfig, entry: FeedEntry) -> Option<Self> {
        let link = entry.link.filter(|l| !l.trim().is_empty())?;
        let item_id = item_id(entry.id.as_deref(), &link, &entry.title);

        Some(Self {
            feed_identity: feed.identity().to_string(),
            item_id,
            title: entry.title,
            link,
            published_at: entry.published,
            tags: feed.tags.clone(),
        })
    }
}

/// Stable identifier for an item: the guid when the feed supplies one,
/// otherwise the link and title.
///
/// Feeds fetched through [`RssAtomSource`](crate::sources::RssAtomSource)
/// always carry an id: feed-rs derives one from the link and title of RSS
/// items without a `<guid>`. The link and title branch covers sources that
/// hand over entries without any id.
pub fn item_id(guid: Option<&str>, link: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    match guid.map(str::trim).filter(|g| !g.is_empty()) {
        Some(guid) => {
            hasher.update(b"guid:");
            hasher.update(guid.as_bytes());
        }
        None => {
            hasher.update(b"link:");
            hasher.update(link.as_bytes());
            hasher.update(b"\ntitle:");
            hasher.update(title.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::domain::FeedEntry;
use crate::errors::FetchError;
use crate::sources::traits::FeedSource;

pub struct RssAtomSource {
    client: Client,
}

impl RssAtomSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .user_agent(concat!("feedbag/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Parse entries from raw feed bytes
    pub fn entries_from_bytes(bytes: &[u8]) -> Result<Vec<FeedEntry>, FetchError> {
        let parsed = parser::parse(bytes).map_err(|e| FetchError::Permanent(e.to_string()))?;

        let entries = parsed
            .entries
            .into_iter()
            .map(|entry| {
                let id = Some(entry.id).filter(|id| !id.trim().is_empty());

                let title = entry.title.map(|t| t.content).unwrap_or_default();

                // Prefer the alternate (article) link over self/enclosure links
                let link = entry
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                    .or_else(|| entry.links.first())
                    .map(|l| l.href.clone());

                let published = entry.published.or(entry.updated);

                FeedEntry::new(title)
                    .with_id(id)
                    .with_link(link)
                    .with_published(published)
            })
            .collect();

        Ok(entries)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl FeedSource for RssAtomSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FetchError> {
        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::Permanent(e.to_string())
            } else {
                FetchError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("{} returned {}", url, status);
            return Err(if is_transient_status(status) {
                FetchError::Transient(reason)
            } else {
                FetchError::Permanent(reason)
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let entries = Self::entries_from_bytes(&bytes)?;
        debug!("Found {} entries in feed: {}", entries.len(), url);
        Ok(entries)
    }
}

use async_trait::async_trait;

use crate::domain::FeedEntry;
use crate::errors::FetchError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the entries of the feed at `url`, in document order
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FetchError>;
}

use std::collections::BTreeSet;

use serde::Serialize;

/// How many items a newly added feed delivers when none is configured.
pub const DEFAULT_FIRST_SIGHT_ITEMS: usize = 10;

/// One configured RSS/Atom source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    pub tags: BTreeSet<String>,
    pub max_items_on_first_sight: usize,
}

impl FeedConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            tags: BTreeSet::new(),
            max_items_on_first_sight: DEFAULT_FIRST_SIGHT_ITEMS,
        }
    }

    /// Key under which this feed's items are recorded in the seen ledger
    pub fn identity(&self) -> &str {
        &self.url
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_items_on_first_sight(mut self, max_items: usize) -> Self {
        self.max_items_on_first_sight = max_items;
        self
    }
}

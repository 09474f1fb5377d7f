pub mod feed;
pub mod entry;
pub mod link;
pub mod outcome;
pub mod report;

pub use feed::{FeedConfig, DEFAULT_FIRST_SIGHT_ITEMS};
pub use entry::{item_id, CandidateItem, FeedEntry};
pub use outcome::DeliveryOutcome;
pub use report::{CycleReport, FeedCycleReport, FeedStatus, FlushStatus, ItemFailure};

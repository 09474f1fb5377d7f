pub mod processor;
pub mod retry;
pub mod scheduler;

pub use processor::FeedProcessor;
pub use retry::{DeliveryAttempt, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerState, DEFAULT_CONCURRENCY};

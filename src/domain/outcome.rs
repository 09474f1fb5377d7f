use std::time::Duration;

use serde::Serialize;

/// Result of one attempt to hand an item to the downstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
        retriable: bool,
        /// Minimum wait the downstream service asked for before the next attempt
        #[serde(skip)]
        retry_after: Option<Duration>,
    },
}

impl DeliveryOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        DeliveryOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>, retriable: bool) -> Self {
        DeliveryOutcome::Failed {
            reason: reason.into(),
            retriable,
            retry_after: None,
        }
    }

    /// Attach a server-provided wait hint. No effect on non-failures.
    pub fn with_retry_after(mut self, hint: Option<Duration>) -> Self {
        if let DeliveryOutcome::Failed { retry_after, .. } = &mut self {
            *retry_after = hint;
        }
        self
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { retriable: true, .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryOutcome::Failed { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

use chrono::TimeDelta;
use std::fmt;

/// Failure of the hand-off step, classified by the sink that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    /// Network, timeout, rate limit or 5xx-class. The message is handed off
    /// again by a later re-scan.
    Transient(String),
    /// Malformed recipient or permanent rejection. Never retried.
    Fatal(String),
}

impl HandoffError {
    pub fn reason(&self) -> &str {
        match self {
            HandoffError::Transient(reason) | HandoffError::Fatal(reason) => reason,
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, HandoffError::Transient(_))
    }
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffError::Transient(reason) => write!(f, "transient hand-off failure: {reason}"),
            HandoffError::Fatal(reason) => write!(f, "fatal hand-off failure: {reason}"),
        }
    }
}

impl std::error::Error for HandoffError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// How long a message may sit at `sent` after its last hand-off attempt
    /// before the re-scan tries again.
    pub retry_grace: TimeDelta,
    /// Hand-off attempts per message, the initial claim included.
    pub max_attempts: u32,
    /// Messages stuck in `processing` longer than this are reverted to `draft`.
    pub stale_processing_after: TimeDelta,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            retry_grace: TimeDelta::minutes(5),
            max_attempts: 3,
            stale_processing_after: TimeDelta::minutes(5),
        }
    }
}

/// Outcome counts for one pass over a claimed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub discovered: usize,
    pub claimed: usize,
    pub delivered: usize,
    pub retryable: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub schedules_marked_sent: u64,
    pub schedules_cancelled: u64,
    pub drafts_released: u64,
}

use std::fmt;
use std::time::Duration;

/// Failure of a single Tone Generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Rate limit, 5xx-class or connection trouble; worth another attempt.
    Transient(String),
    /// Rejected request or unusable response; retrying will not help.
    Fatal(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Transient(reason) => write!(f, "transient generation failure: {reason}"),
            GenerationError::Fatal(reason) => write!(f, "fatal generation failure: {reason}"),
        }
    }
}

impl std::error::Error for GenerationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPolicy {
    /// Bound on a single generator call.
    pub unit_timeout: Duration,
    pub max_attempts: u32,
    /// Backoff before attempt `n + 1` is `base_backoff * n²`.
    pub base_backoff: Duration,
    /// Bound on the whole fan-out, all tones and retries included.
    pub deadline: Duration,
}

impl GenerationPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::random_range(0.0..0.1);
        self.base_backoff
            .saturating_mul(attempt.saturating_mul(attempt))
            .mul_f64(1.0 + jitter)
    }
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            unit_timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            deadline: Duration::from_secs(90),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_quadratically_with_small_jitter() {
        let policy = GenerationPolicy {
            base_backoff: Duration::from_millis(100),
            ..GenerationPolicy::default()
        };
        let first = policy.backoff(1);
        let second = policy.backoff(2);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(111));
        assert!(second >= Duration::from_millis(400) && second < Duration::from_millis(441));
    }
}

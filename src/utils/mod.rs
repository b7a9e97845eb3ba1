//! Shared helpers: retry backoff and JSON extraction from LLM output.

pub mod json_extraction;

use std::time::Duration;

/// Delay before retry number `attempt + 1`: `2^attempt` seconds.
///
/// Attempt counting starts at zero, so a client with three attempts sleeps
/// 1s and then 2s between them.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let delays: Vec<Duration> = (0..20).map(backoff_delay).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}

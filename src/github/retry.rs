use std::time::Duration;

use rand::Rng;

/// Backoff schedule for transient GitHub failures: exponential from a 500ms
/// base, doubling per attempt, capped at 30s, with ±20% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), pre-jitter.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    /// Jittered delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt).as_millis() as f64;
        let spread = raw * self.jitter;
        let jittered = rand::rng().random_range((raw - spread)..=(raw + spread));
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.raw_delay(0), Duration::from_millis(500));
        assert_eq!(policy.raw_delay(1), Duration::from_secs(1));
        assert_eq!(policy.raw_delay(2), Duration::from_secs(2));
        assert_eq!(policy.raw_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn schedule_caps_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.raw_delay(10), Duration::from_secs(30));
        assert_eq!(policy.raw_delay(31), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let raw = policy.raw_delay(attempt).as_millis() as f64;
            for _ in 0..50 {
                let jittered = policy.delay(attempt).as_millis() as f64;
                assert!(jittered >= raw * 0.8 - 1.0 && jittered <= raw * 1.2 + 1.0);
            }
        }
    }

    #[test]
    fn five_attempts_by_default() {
        let policy = RetryPolicy::default();
        assert!(!policy.attempts_exhausted(3));
        assert!(policy.attempts_exhausted(4));
    }
}

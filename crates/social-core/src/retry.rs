use std::time::Duration;

const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff and attempt cap applied to failed event flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Cap on failed attempts per queued mutation (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a mutation that has failed `failed_attempts` times may be retried.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Wait before the flush following `consecutive_failures` failed ones.
    ///
    /// Doubles from the base delay, never exceeds the cap, and never undercuts
    /// a server `Retry-After` hint below the cap.
    pub fn delay_for_attempt(&self, consecutive_failures: u32, retry_after_ms: Option<u64>) -> Duration {
        let backoff = 2_u64
            .saturating_pow(consecutive_failures)
            .saturating_mul(self.base_delay_ms);
        let wait = retry_after_ms.map_or(backoff, |hint| backoff.max(hint));
        Duration::from_millis(wait.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failed_flush_waits_the_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2, None), Duration::from_secs(2));
    }

    #[test]
    fn long_failure_streaks_stay_at_the_cap() {
        let policy = RetryPolicy::new(200, 5_000);
        assert_eq!(policy.delay_for_attempt(4, None), Duration::from_millis(3_200));
        assert_eq!(policy.delay_for_attempt(5, None), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(u32::MAX, None), Duration::from_secs(5));
    }

    #[test]
    fn rate_limit_hint_extends_short_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(0, Some(7_000)),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay_for_attempt(0, Some(120_000)),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.delay_for_attempt(3, Some(100)),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn cap_never_falls_below_base() {
        let policy = RetryPolicy::new(1_000, 10);
        assert_eq!(policy.max_delay_ms(), 1_000);
        assert_eq!(policy.delay_for_attempt(0, None), Duration::from_secs(1));
    }

    #[test]
    fn attempt_cap_is_at_least_one() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(policy.allows_retry(0));
        assert!(!policy.allows_retry(1));

        let default = RetryPolicy::default();
        assert!(default.allows_retry(4));
        assert!(!default.allows_retry(5));
    }
}

use std::time::Duration;

/// Backoff schedule for transient store conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempt` (1-based) failed
    /// transiently, or `None` once the attempt ceiling is reached.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);

        Some(delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = policy(10);

        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(40)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(80)));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy(40);

        assert_eq!(policy.delay_for(5), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(39), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_ceiling_stops_retries() {
        let policy = policy(3);

        assert!(policy.delay_for(2).is_some());
        assert_eq!(policy.delay_for(3), None);
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        assert_eq!(policy(1).delay_for(1), None);
    }
}

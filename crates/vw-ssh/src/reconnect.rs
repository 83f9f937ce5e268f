//! Exponential backoff for connection attempts

use std::time::Duration;

use vw_core::config::BackoffConfig;

/// Exponential backoff with jitter and a bounded number of attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Retries left after the first attempt
    remaining: u32,
}

impl ExponentialBackoff {
    /// Create a backoff from configuration
    ///
    /// `attempts` counts the first try, so a value of 4 allows three retries.
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config.initial,
            config.max,
            config.multiplier,
            config.jitter,
            config.attempts,
        )
    }

    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        attempts: u32,
    ) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
            remaining: attempts.saturating_sub(1),
        }
    }

    /// Delay before the next retry, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.current;
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = next.min(self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        Some(delay + Duration::from_secs_f64(jitter_amount))
    }

    /// Retries left
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_capped() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(5),
            Duration::from_secs(12),
            2.0,
            0.0,
            10,
        );

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(12)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_backoff_budget_counts_first_attempt() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.0, 3);

        assert_eq!(backoff.remaining(), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(4), Duration::from_secs(60), 1.0, 0.5, 50);

        for _ in 0..40 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(6));
        }
    }
}

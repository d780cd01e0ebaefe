use crate::config::BatchConfig;
use std::time::Duration;

/// Label written to every audit row's `retry_strategy` column
pub const RETRY_STRATEGY: &str = "exponential_backoff";

/// Exponential backoff schedule
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`, optionally
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, max: Option<Duration>) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            config.backoff_max_ms.map(Duration::from_millis),
        )
    }

    /// Calculates the delay before retry number `retry`
    ///
    /// # Arguments
    ///
    /// * `retry` - 1 for the first retry, 2 for the second, and so on
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_harvest::batch::Backoff;
    /// use std::time::Duration;
    ///
    /// let backoff = Backoff::new(Duration::from_secs(1), None);
    /// assert_eq!(backoff.delay(1), Duration::from_secs(1));
    /// assert_eq!(backoff.delay(3), Duration::from_secs(4));
    /// ```
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent);

        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay in whole milliseconds, saturating at `i64::MAX`
    pub fn delay_ms(&self, retry: u32) -> i64 {
        i64::try_from(self.delay(retry).as_millis()).unwrap_or(i64::MAX)
    }
}

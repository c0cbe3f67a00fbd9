use rand::Rng;
use std::time::Duration;

/// Configuration for retrying failed store calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Sequence of delays between retries, growing geometrically up to a cap
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    attempt: usize,
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { attempt: 0, config }
    }

    /// Delay before the next retry, or `None` once retries are used up
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        self.attempt += 1;

        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let mut delay_ms = (base_ms * self.config.backoff_multiplier.powi(exponent)).min(max_ms);

        if self.config.use_jitter {
            delay_ms *= rand::rng().random_range(0.5..=1.0);
        }

        Some(Duration::from_millis(delay_ms as u64))
    }

    /// Retries handed out so far
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.next_backoff()
    }
}

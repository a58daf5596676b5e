use std::time::Duration;

use rand::Rng;

/// Configuration for exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential delay.
    pub max_delay: Duration,
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Capped exponential backoff with full jitter.
///
/// Each delay is drawn uniformly from [base/2, base] where base doubles per
/// attempt up to the configured cap, so simultaneous reconnecting workers
/// don't stampede the source.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The next delay to sleep, or None once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        let exp = self
            .config
            .base_delay
            .saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .min(self.config.max_delay);
        self.attempt += 1;

        let exp_ms = exp.as_millis() as u64;
        let jittered = rand::rng().random_range(exp_ms / 2..=exp_ms.max(1));
        Some(Duration::from_millis(jittered))
    }

    /// Attempts consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful operation so the next failure starts from
    /// the base delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

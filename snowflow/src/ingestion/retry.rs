//! Fixed-delay retry with request pacing.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::RateLimitConfig;

/// How a fetch is paced and retried.
///
/// Every attempt is preceded by `pacing`; failed attempts are followed by
/// `delay` unless they were the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
    /// Pause before every attempt.
    pub pacing: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RetryPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        let pacing = if config.requests_per_second > 0.0 {
            secs(1.0 / config.requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            max_attempts: config.retry_attempts.max(1),
            delay: secs(config.retry_delay),
            pacing,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl RetryPolicy {
    /// Creates a policy with no pauses.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            pacing: Duration::ZERO,
        }
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the pause before each attempt.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Runs `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Returns `None` when every
    /// attempt failed; failures are logged, never returned.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Option<T>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            match op(attempt).await {
                Ok(value) => return Some(value),
                Err(err) if attempt < attempts => {
                    warn!(
                        target_name = label,
                        attempt,
                        error = %err,
                        retry_in_secs = self.delay.as_secs_f64(),
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    error!(target_name = label, attempts, error = %err, "All attempts failed");
                }
            }
        }
        None
    }
}

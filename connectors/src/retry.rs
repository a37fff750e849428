//! Exponential backoff with full jitter.
//!
//! The delay before retry `n` is drawn uniformly from
//! `[0, min(max_delay, starting_delay * multiplier^n)]`, which spreads a
//! herd of rate-limited callers instead of re-synchronizing them.

use std::future::Future;
use std::time::Duration;

use config::RetryConfig;
use rand::Rng as _;

use crate::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub starting_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            starting_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            starting_delay: Duration::from_millis(config.starting_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// Permalink lookups are rate limited far below the rest of the Slack
    /// API, so they get a much deeper retry budget.
    pub fn permalinks() -> Self {
        Self {
            max_attempts: 100,
            ..Self::default()
        }
    }

    /// Upper bound of the delay window before retry number `attempt`
    /// (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.starting_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        self.max_delay.min(Duration::from_millis(scaled as u64))
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let bound = self.delay_for(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget
    /// runs out. Only errors flagged retryable are retried.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(ConnectorError::Exhausted {
                            attempts: attempt,
                            source: Box::new(error)
                        });
                    }
                    let delay = match &error {
                        // A server-provided Retry-After overrides our window.
                        ConnectorError::RateLimited {
                            retry_after: Some(after),
                            ..
                        } => *after,
                        _ => self.jittered(attempt - 1),
                    };
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

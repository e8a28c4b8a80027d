//! Bounded retries for transient communication failures

use std::{fmt, future::Future, str::FromStr, time::Duration};

use interlink_types::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Constant `base_delay`
    Linear,
    /// `base_delay * 2^attempt_index`
    #[default]
    Exponential,
    /// Constant `base_delay`; no Fibonacci growth is applied
    Fibonacci,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStrategy::Linear => write!(f, "linear"),
            RetryStrategy::Exponential => write!(f, "exponential"),
            RetryStrategy::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

impl FromStr for RetryStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(RetryStrategy::Linear),
            "exponential" => Ok(RetryStrategy::Exponential),
            "fibonacci" => Ok(RetryStrategy::Fibonacci),
            other => Err(Error::Config(format!("Unknown retry strategy: {}", other))),
        }
    }
}

/// Retry policy for one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    strategy: RetryStrategy,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` counts the first try
    pub fn new(max_attempts: u32, base_delay: Duration, strategy: RetryStrategy) -> Self {
        if strategy == RetryStrategy::Fibonacci {
            warn!("Fibonacci retry strategy uses a fixed delay between attempts");
        }
        Self { max_attempts: max_attempts.max(1), base_delay, strategy }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    /// Delay to wait after the attempt with zero-based index `attempt_index` fails
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Linear | RetryStrategy::Fibonacci => self.base_delay,
            RetryStrategy::Exponential => {
                self.base_delay.saturating_mul(2u32.saturating_pow(attempt_index))
            },
        }
    }

    /// Run `attempt` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is spent
    ///
    /// Non-transient errors are returned immediately without consuming a
    /// retry. After the last attempt the final error is returned as-is.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt_index = 0;

        loop {
            debug!(attempt = attempt_index + 1, operation = %operation, "Attempting request");

            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(err);
            }

            if attempt_index + 1 >= self.max_attempts {
                error!(
                    attempts = self.max_attempts,
                    operation = %operation,
                    error = %err,
                    "Request failed after all retry attempts"
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt_index);
            warn!(
                attempt = attempt_index + 1,
                operation = %operation,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt_index += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), RetryStrategy::Exponential)
    }
}

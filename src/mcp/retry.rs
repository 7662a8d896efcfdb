//! Exponential-backoff retry for connection attempts
//!
//! [`RetryPolicy::run`] makes up to `max_retries + 1` attempts. Before
//! attempt `n` (zero-based, `n >= 1`) it sleeps `base_delay * 2^(n-1)`, so
//! with the default one-second base the waits are 1s, 2s, 4s, ...
//!
//! The caller's [`CancellationToken`] is honoured both while an attempt is
//! running and while sleeping; cancellation yields
//! [`ConductorError::Cancelled`], never the attempt's own error.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ConductorError, Result};
use crate::mcp::config::RetryConfig;

/// Backoff schedule for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.base_delay())
    }
}

impl RetryPolicy {
    /// Policy doubling from `base_delay`.
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Sleep preceding zero-based `attempt`. Attempt 0 runs immediately.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// `op` receives the zero-based attempt number.
    ///
    /// # Errors
    ///
    /// - [`ConductorError::Cancelled`] if `cancel` fires at any point.
    /// - Otherwise the error of the final attempt, unchanged.
    pub async fn run<T, F, Fut>(
        &self,
        server: &str,
        max_retries: u32,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = max_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ConductorError::Cancelled.into());
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConductorError::Cancelled.into()),
                outcome = op(attempt) => outcome,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= attempts {
                tracing::warn!(
                    server = %server,
                    attempt,
                    error = %err,
                    "Connection attempt failed; no retries left"
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                server = %server,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Connection attempt failed; retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConductorError::Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

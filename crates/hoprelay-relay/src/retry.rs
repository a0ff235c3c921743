// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded exponential backoff around single hop calls.

use std::future::Future;
use std::time::Duration;

use hoprelay_config::model::RetryConfig;
use hoprelay_core::{Hop, RelayError};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `retry` (1-based): doubling from the base,
    /// capped, and with jitter drawn from the upper half of the interval.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        let delay = self
            .base_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff);
        if !self.jitter || delay.as_millis() < 2 {
            return delay;
        }
        let low = delay / 2;
        let width = (delay - low).as_millis() as u64;
        low + Duration::from_millis(rand::thread_rng().gen_range(0..=width))
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or runs
/// out of attempts. Every attempt is bounded by `timeout`; an elapsed
/// attempt counts as a transient failure.
///
/// Cancellation only cuts a backoff sleep short. An attempt that already
/// started is allowed to finish, and the last error is returned.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    hop: Hop,
    mut op: F,
) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout { duration: timeout }),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(
                    %hop,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "hop call failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(err),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

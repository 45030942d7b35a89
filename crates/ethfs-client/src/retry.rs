//! Exponential back-off for remote calls that are safe to repeat.
//!
//! Only idempotent reads (endpoint probes, chain-id queries) go through
//! here; submitted transactions are never retried.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RpcConfig;
use crate::error::{ClientError, ClientResult};

/// Doubles the wait after each attempt up to `max_wait`, and gives up once
/// `total_budget` has elapsed since creation.
#[derive(Debug)]
pub struct ExponentialBackoff {
    max_wait: Duration,
    total_budget: Duration,
    current_wait: Duration,
    start: Instant,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(init_wait: Duration, max_wait: Duration, total_budget: Duration) -> Self {
        Self {
            max_wait,
            total_budget,
            current_wait: init_wait,
            start: Instant::now(),
            attempts: 0,
        }
    }

    /// Back-off schedule for endpoint probes.
    pub fn for_probe(config: &RpcConfig) -> Self {
        Self::new(
            config.probe_retry_init_wait,
            config.probe_retry_max_wait,
            config.probe_retry_total_time,
        )
    }

    /// Next wait, clamped to the remaining budget, or `None` once the budget
    /// is spent.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let elapsed = self.start.elapsed();
        if elapsed >= self.total_budget {
            return None;
        }

        let wait = self.current_wait;
        self.current_wait = (self.current_wait * 2).min(self.max_wait);
        self.attempts += 1;

        let remaining = self.total_budget.saturating_sub(elapsed);
        Some(wait.min(remaining))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.start.elapsed() >= self.total_budget
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// back-off budget runs out. Only `Unavailable` is retried.
pub async fn retry<T, F, Fut>(
    mut backoff: ExponentialBackoff,
    what: &str,
    mut op: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    loop {
        match op().await {
            Err(ClientError::Unavailable(reason)) => match backoff.next_wait() {
                Some(wait) => {
                    debug!(what, %reason, attempt = backoff.attempts(), ?wait, "retrying");
                    tokio::time::sleep(wait).await;
                }
                None => return Err(ClientError::Unavailable(reason)),
            },
            other => return other,
        }
    }
}

//! Bounded linear-backoff retry for transient backend failures

use crate::core::config::{Configuration, RetrySettings};
use crate::core::error::{Result, ServiceError};
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Number of retries a backend has performed since it was created
///
/// Incremented once per retry attempt (the initial attempt does not count).
#[derive(Debug, Default)]
pub struct ReconnectCounter(AtomicU64);

impl ReconnectCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Retry budget and backoff
///
/// Retry `i` (1-based) waits `base_backoff * i` before running, so a call that
/// exhausts its budget sleeps `base_backoff * n(n+1)/2` in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        let backoff = settings.backoff_duration().unwrap_or(if settings.backoff > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        });
        Self::new(settings.retries, backoff)
    }

    pub fn from_config(config: &Configuration) -> Result<Self> {
        Ok(Self::from_settings(&config.settings()?.retry))
    }

    /// Run the operation once, with no retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry `attempt` (1-based), saturating at `Duration::MAX`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(attempt)
    }

    /// Total sleep when every retry is used, saturating at `Duration::MAX`
    pub fn total_backoff(&self) -> Duration {
        let n = u128::from(self.max_retries);
        let nanos = self.base_backoff.as_nanos().saturating_mul(n * (n + 1) / 2);
        u64::try_from(nanos / 1_000_000_000)
            .map(|secs| Duration::new(secs, (nanos % 1_000_000_000) as u32))
            .unwrap_or(Duration::MAX)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent
    ///
    /// Every transient failure is logged; after the last retry the most
    /// recent error is returned unchanged.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        target: &str,
        counter: &ReconnectCounter,
        is_transient: C,
        mut op: F,
    ) -> std::result::Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if retries > 0 {
                        info!("{} recovered after {} retries", target, retries);
                    }
                    return Ok(value);
                }
                Err(err) if is_transient(&err) => {
                    if retries >= self.max_retries {
                        error!(
                            "{} still failing after {} retries, giving up: {}",
                            target, retries, err
                        );
                        return Err(err);
                    }
                    retries += 1;
                    let delay = self.backoff(retries);
                    warn!(
                        "Transient failure from {} (retry {}/{} in {:?}): {}",
                        target, retries, self.max_retries, delay, err
                    );
                    counter.increment();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A backend whose operations are retried on transient failure
#[async_trait]
pub trait Retryable: Send + Sync {
    /// Name used in log lines
    fn target(&self) -> &str;

    fn reconnects(&self) -> &ReconnectCounter;

    fn retry_policy(&self) -> &RetryPolicy;

    /// Whether an error from this backend is worth retrying
    fn classify(&self, err: &ServiceError) -> bool {
        err.is_transient()
    }

    /// Run `op` under this backend's retry policy
    async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.retry_policy()
            .run(self.target(), self.reconnects(), |err| self.classify(err), op)
            .await
    }
}

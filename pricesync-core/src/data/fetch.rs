//! Fetch client: one ticker, one date range, retries with exponential backoff.
//!
//! The retry loop consumes [`Attempt`] values from a [`PriceSource`]:
//! transient failures are retried up to `max_retries` times, permanent
//! failures return immediately. Delays go through an injectable function so
//! tests can observe them without sleeping.

use super::provider::{Attempt, FetchCause, FetchError, PriceSource};
use crate::domain::PriceBar;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for every retry after that.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

type DelayFn = Box<dyn Fn(Duration) + Send + Sync>;

/// Fetches price bars through a [`PriceSource`], retrying transient failures.
pub struct FetchClient {
    source: Box<dyn PriceSource>,
    policy: RetryPolicy,
    delay: DelayFn,
    requests: AtomicU64,
}

impl FetchClient {
    /// Client that blocks the current thread between retries.
    pub fn new(source: Box<dyn PriceSource>, policy: RetryPolicy) -> Self {
        Self::with_delay(source, policy, std::thread::sleep)
    }

    /// Client with a custom delay function (tests pass a recorder).
    pub fn with_delay(
        source: Box<dyn PriceSource>,
        policy: RetryPolicy,
        delay: impl Fn(Duration) + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            policy,
            delay: Box::new(delay),
            requests: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Total requests issued to the source so far, retries included.
    pub fn requests_made(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Fetch bars for `ticker` between `start` and `end` inclusive, sorted by
    /// date ascending.
    pub fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, FetchError> {
        if ticker.trim().is_empty() {
            return Err(FetchError::Permanent {
                ticker: ticker.to_string(),
                cause: FetchCause::InvalidRequest {
                    message: "ticker must not be empty".into(),
                },
            });
        }
        if start > end {
            return Err(FetchError::Permanent {
                ticker: ticker.to_string(),
                cause: FetchCause::InvalidRequest {
                    message: format!("start date {start} is after end date {end}"),
                },
            });
        }

        let mut retry = 0;
        loop {
            self.requests.fetch_add(1, Ordering::Relaxed);
            let cause = match self.source.fetch_once(ticker, start, end) {
                Attempt::Success(mut bars) => {
                    bars.sort_by_key(PriceBar::date);
                    tracing::debug!(ticker, rows = bars.len(), attempts = retry + 1, "fetched");
                    return Ok(bars);
                }
                Attempt::Permanent(cause) => {
                    return Err(FetchError::Permanent {
                        ticker: ticker.to_string(),
                        cause,
                    });
                }
                Attempt::Transient(cause) => cause,
            };

            if retry >= self.policy.max_retries {
                return Err(FetchError::RetriesExhausted {
                    ticker: ticker.to_string(),
                    attempts: retry + 1,
                    cause,
                });
            }

            retry += 1;
            let delay = self.policy.delay_for_retry(retry);
            tracing::warn!(
                ticker,
                attempt = retry,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "transient fetch failure, backing off"
            );
            (self.delay)(delay);
        }
    }
}

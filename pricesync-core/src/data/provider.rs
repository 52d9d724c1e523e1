//! Price source trait and structured fetch error types.
//!
//! A `PriceSource` performs exactly one request and classifies the outcome
//! as success, transient failure, or permanent failure. Retrying is the
//! job of [`FetchClient`](super::fetch::FetchClient), so sources stay free of
//! sleep and loop logic and can be scripted in tests.

use crate::domain::PriceBar;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Outcome of a single request to the upstream price API.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Worth retrying: network error, server error, rate limit.
    Transient(FetchCause),
    /// Retrying cannot help: unknown ticker, malformed response, bad request.
    Permanent(FetchCause),
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchCause {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("rate limited by provider{}", retry_after_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("ticker not found: {ticker}")]
    InvalidTicker { ticker: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {message}")]
    Malformed { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

fn retry_after_hint(secs: &Option<u64>) -> String {
    secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default()
}

/// A ticker could not be fetched. Scoped to that ticker; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{ticker}: {cause}")]
    Permanent { ticker: String, cause: FetchCause },

    #[error("{ticker}: gave up after {attempts} attempts, last error: {cause}")]
    RetriesExhausted {
        ticker: String,
        attempts: u32,
        cause: FetchCause,
    },
}

impl FetchError {
    pub fn ticker(&self) -> &str {
        match self {
            Self::Permanent { ticker, .. } | Self::RetriesExhausted { ticker, .. } => ticker,
        }
    }

    pub fn cause(&self) -> &FetchCause {
        match self {
            Self::Permanent { cause, .. } | Self::RetriesExhausted { cause, .. } => cause,
        }
    }
}

/// The upstream price API, one request per call.
///
/// Implementations return bars for `ticker` between `start` and `end`
/// inclusive; ordering is normalized by the caller.
pub trait PriceSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    fn fetch_once(&self, ticker: &str, start: NaiveDate, end: NaiveDate)
        -> Attempt<Vec<PriceBar>>;
}

//! Tiingo end-of-day price source.
//!
//! Issues `GET {base}/{ticker}/prices?startDate=..&endDate=..` and turns the
//! JSON array it returns into [`PriceBar`]s. Each call is a single request;
//! status codes and transport errors are classified into transient and
//! permanent failures for the retry loop in `FetchClient`.

use super::provider::{Attempt, FetchCause, PriceSource};
use crate::domain::PriceBar;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Tiingo daily prices endpoint.
pub const TIINGO_DAILY_URL: &str = "https://api.tiingo.com/tiingo/daily";

/// One row of Tiingo's daily prices response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TiingoRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    adj_close: Option<f64>,
}

/// Tiingo price source over a blocking HTTP client.
pub struct TiingoSource {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

impl TiingoSource {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(api_key, timeout, TIINGO_DAILY_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pricesync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn prices_url(&self, ticker: &str) -> String {
        format!("{}/{}/prices", self.base_url, ticker.to_ascii_lowercase())
    }
}

impl PriceSource for TiingoSource {
    fn name(&self) -> &str {
        "tiingo"
    }

    fn fetch_once(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Attempt<Vec<PriceBar>> {
        let url = self.prices_url(ticker);
        tracing::debug!(ticker, %url, %start, %end, "requesting Tiingo prices");

        let response = match self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .query(&[
                ("startDate", start.to_string()),
                ("endDate", end.to_string()),
            ])
            .send()
        {
            Ok(resp) => resp,
            Err(e) => {
                // Connection, timeout, and other transport failures are all retryable.
                return Attempt::Transient(FetchCause::Network {
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().unwrap_or_default();
            return classify_status(ticker, status, retry_after, body);
        }

        match response.text() {
            Ok(body) => match parse_prices(ticker, &body) {
                Ok(bars) => Attempt::Success(bars),
                Err(cause) => Attempt::Permanent(cause),
            },
            Err(e) => Attempt::Transient(FetchCause::Network {
                message: format!("failed to read response body: {e}"),
            }),
        }
    }
}

/// Map a non-success status onto a transient or permanent failure.
fn classify_status(
    ticker: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
) -> Attempt<Vec<PriceBar>> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::Transient(FetchCause::RateLimited { retry_after_secs });
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return Attempt::Transient(FetchCause::Server {
            status: status.as_u16(),
        });
    }
    if status == StatusCode::NOT_FOUND {
        return Attempt::Permanent(FetchCause::InvalidTicker {
            ticker: ticker.to_string(),
        });
    }
    Attempt::Permanent(FetchCause::Http {
        status: status.as_u16(),
        body: truncate(&body, 200),
    })
}

/// Parse a Tiingo prices response body into bars for `ticker`.
pub fn parse_prices(ticker: &str, body: &str) -> Result<Vec<PriceBar>, FetchCause> {
    let rows: Vec<TiingoRow> = serde_json::from_str(body).map_err(|e| FetchCause::Malformed {
        message: format!("expected a JSON array of price rows for {ticker}: {e}"),
    })?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let date = parse_date(&row.date).ok_or_else(|| FetchCause::Malformed {
            message: format!("unparseable date {:?}", row.date),
        })?;
        let volume = parse_volume(row.volume).ok_or_else(|| FetchCause::Malformed {
            message: format!("invalid volume {:?} on {date}", row.volume),
        })?;

        let bar = PriceBar::new(
            ticker,
            date,
            row.open,
            row.high,
            row.low,
            row.close,
            row.adj_close,
            volume,
        )
        .map_err(|e| FetchCause::Malformed {
            message: format!("invalid price row on {date}: {e}"),
        })?;
        bars.push(bar);
    }

    bars.sort_by_key(PriceBar::date);
    Ok(bars)
}

/// Tiingo sends `2024-01-02T00:00:00.000Z`. A bare `2024-01-02` or a
/// timestamp without an offset is accepted too; anything else is rejected.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

/// Volume arrives as a JSON number that may carry a fractional part.
fn parse_volume(raw: Option<f64>) -> Option<u64> {
    match raw {
        None => Some(0),
        Some(v) if v.is_finite() && v >= 0.0 => Some(v.round() as u64),
        Some(_) => None,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

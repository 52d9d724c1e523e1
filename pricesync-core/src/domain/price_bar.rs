//! End-of-day price bar and the store key used for deduplication.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected while constructing a [`PriceBar`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("ticker must not be empty")]
    EmptyTicker,
}

/// One ticker's end-of-day prices on one date.
///
/// Built once from a parsed API row and never mutated afterwards. The
/// ticker is not part of the serialized form: exports group bars under
/// their ticker, so each serialized bar carries only
/// `date, open, high, low, close, adjClose, volume`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBar {
    #[serde(skip_serializing)]
    ticker: String,
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adj_close: Option<f64>,
    volume: u64,
}

impl PriceBar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticker: impl Into<String>,
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        adj_close: Option<f64>,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        let ticker = ticker.into();
        if ticker.trim().is_empty() {
            return Err(ValidationError::EmptyTicker);
        }
        Ok(Self {
            ticker,
            date,
            open,
            high,
            low,
            close,
            adj_close,
            volume,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn adj_close(&self) -> Option<f64> {
        self.adj_close
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    /// The `(ticker, date)` key this bar would occupy in the store.
    pub fn key(&self) -> ExistingRowKey {
        ExistingRowKey::new(self.ticker.clone(), self.date)
    }
}

/// A `(ticker, date)` pair already present in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExistingRowKey {
    pub ticker: String,
    pub date: NaiveDate,
}

impl ExistingRowKey {
    pub fn new(ticker: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn empty_ticker_is_rejected() {
        let err = PriceBar::new("  ", d(2024, 1, 2), 1.0, 1.0, 1.0, 1.0, None, 0).unwrap_err();
        assert_eq!(err, ValidationError::EmptyTicker);
    }

    #[test]
    fn key_matches_ticker_and_date() {
        let bar = PriceBar::new("AAA", d(2024, 1, 2), 1.0, 2.0, 0.5, 1.5, Some(1.4), 10).unwrap();
        assert_eq!(bar.key(), ExistingRowKey::new("AAA", d(2024, 1, 2)));
    }

    #[test]
    fn serialized_form_omits_ticker_and_uses_adj_close_camel_case() {
        let bar = PriceBar::new("AAA", d(2024, 1, 2), 1.0, 2.0, 0.5, 1.5, Some(1.4), 10).unwrap();
        let json = serde_json::to_value(&bar).unwrap();

        assert!(json.get("ticker").is_none());
        assert_eq!(json["date"], "2024-01-02");
        assert_eq!(json["adjClose"], 1.4);
        assert_eq!(json["volume"], 10);
    }

    #[test]
    fn missing_adj_close_serializes_as_null() {
        let bar = PriceBar::new("AAA", d(2024, 1, 2), 1.0, 2.0, 0.5, 1.5, None, 10).unwrap();
        let json = serde_json::to_value(&bar).unwrap();
        assert!(json["adjClose"].is_null());
    }
}

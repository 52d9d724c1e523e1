//! Target store for price rows.
//!
//! The pipeline needs two things from a store: the keys it already holds for
//! a set of tickers and a date range (one query per batch), and a way to
//! append new rows for one ticker.

pub mod memory;
pub mod notion;

pub use memory::MemoryStore;
pub use notion::{NotionProperties, NotionStore};

use crate::domain::{ExistingRowKey, PriceBar};
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),

    #[error("store returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not decode store response: {0}")]
    Decode(String),
}

/// A failed `insert`. Rows before the failing one may already be stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source} ({written} rows written before the failure)")]
pub struct InsertError {
    pub written: usize,
    pub source: StoreError,
}

impl InsertError {
    pub fn new(written: usize, source: StoreError) -> Self {
        Self { written, source }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub trait PriceStore: Send + Sync {
    fn name(&self) -> &str;

    /// Keys already stored for any of `tickers` with `start <= date <= end`.
    fn existing_keys(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<ExistingRowKey>, StoreError>;

    /// Append `rows` for `ticker` in order; returns the number of rows written.
    ///
    /// On failure the error carries how many leading rows were stored first.
    fn insert(&self, ticker: &str, rows: &[PriceBar]) -> Result<usize, InsertError>;
}

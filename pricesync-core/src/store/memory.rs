//! In-memory store for offline runs and tests.

use super::{InsertError, PriceStore, StoreError};
use crate::domain::{ExistingRowKey, PriceBar};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One recorded `existing_keys` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQuery {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<PriceBar>,
    queries: Vec<KeyQuery>,
    insert_calls: Vec<String>,
    fail_queries: bool,
    /// Ticker -> rows accepted before an insert fails.
    fail_inserts: HashMap<String, usize>,
}

/// Store that keeps rows in a `Vec` and records every call made to it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `rows`.
    pub fn with_rows(rows: impl IntoIterator<Item = PriceBar>) -> Self {
        let store = Self::new();
        store.lock().rows.extend(rows);
        store
    }

    /// Make every `existing_keys` call fail.
    pub fn fail_queries(&self) {
        self.lock().fail_queries = true;
    }

    /// Make `insert` fail for `ticker` before it stores anything.
    pub fn fail_inserts_for(&self, ticker: &str) {
        self.fail_inserts_after(ticker, 0);
    }

    /// Make `insert` for `ticker` store its first `rows` rows and then fail.
    pub fn fail_inserts_after(&self, ticker: &str, rows: usize) {
        self.lock().fail_inserts.insert(ticker.to_string(), rows);
    }

    /// Every row currently held, in insertion order.
    pub fn rows(&self) -> Vec<PriceBar> {
        self.lock().rows.clone()
    }

    pub fn queries(&self) -> Vec<KeyQuery> {
        self.lock().queries.clone()
    }

    /// Tickers passed to `insert`, one entry per call, failed calls included.
    pub fn insert_calls(&self) -> Vec<String> {
        self.lock().insert_calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // State is plain data, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PriceStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn existing_keys(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<ExistingRowKey>, StoreError> {
        let mut state = self.lock();
        state.queries.push(KeyQuery {
            tickers: tickers.to_vec(),
            start,
            end,
        });
        if state.fail_queries {
            return Err(StoreError::Api {
                status: 503,
                body: "memory store configured to fail queries".into(),
            });
        }

        let wanted: HashSet<&str> = tickers.iter().map(String::as_str).collect();
        Ok(state
            .rows
            .iter()
            .filter(|bar| wanted.contains(bar.ticker()))
            .filter(|bar| bar.date() >= start && bar.date() <= end)
            .map(PriceBar::key)
            .collect())
    }

    fn insert(&self, ticker: &str, rows: &[PriceBar]) -> Result<usize, InsertError> {
        let mut state = self.lock();
        state.insert_calls.push(ticker.to_string());
        match state.fail_inserts.get(ticker).copied() {
            Some(accepted) if accepted < rows.len() => {
                state.rows.extend_from_slice(&rows[..accepted]);
                Err(InsertError::new(
                    accepted,
                    StoreError::Api {
                        status: 400,
                        body: format!("memory store configured to reject {ticker}"),
                    },
                ))
            }
            _ => {
                state.rows.extend_from_slice(rows);
                Ok(rows.len())
            }
        }
    }
}

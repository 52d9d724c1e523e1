//! Drop fetched rows that the store already holds.

use crate::domain::{ExistingRowKey, PriceBar};
use std::collections::HashSet;

/// Keep the rows whose `(ticker, date)` key is not in `existing`.
///
/// Input order is preserved, and duplicates within `rows` are passed
/// through unchanged: only store membership is checked.
pub fn filter_new(rows: Vec<PriceBar>, existing: &HashSet<ExistingRowKey>) -> Vec<PriceBar> {
    if existing.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|bar| !existing.contains(&bar.key()))
        .collect()
}

//! Ticker list loading.
//!
//! The master list is a JSON array of symbols. Entries are trimmed and
//! upper-cased, blanks are dropped, and repeated symbols keep their first
//! position so every ticker lands in exactly one batch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TickerListError {
    #[error("failed to read ticker list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ticker list must be a JSON array of strings: {0}")]
    NotAnArray(String),

    #[error("ticker list contains no symbols")]
    Empty,
}

/// Load and normalize a ticker list from a JSON file.
pub fn load_tickers(path: &Path) -> Result<Vec<String>, TickerListError> {
    let content = std::fs::read_to_string(path).map_err(|source| TickerListError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tickers(&content)
}

/// Parse and normalize a ticker list from JSON text.
pub fn parse_tickers(content: &str) -> Result<Vec<String>, TickerListError> {
    let raw: Vec<String> =
        serde_json::from_str(content).map_err(|e| TickerListError::NotAnArray(e.to_string()))?;
    let tickers = normalize(raw);
    if tickers.is_empty() {
        return Err(TickerListError::Empty);
    }
    Ok(tickers)
}

/// Trim, upper-case, drop blanks and repeats (first occurrence wins).
pub fn normalize<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in raw {
        let symbol = entry.as_ref().trim().to_ascii_uppercase();
        if symbol.is_empty() {
            continue;
        }
        if !seen.insert(symbol.clone()) {
            tracing::debug!(ticker = %symbol, "dropping repeated ticker");
            continue;
        }
        out.push(symbol);
    }
    out
}

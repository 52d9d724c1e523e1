//! Split the master ticker list into fixed-size, order-preserving batches.

use crate::error::ConfigError;

/// One group of tickers processed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position of the batch in the run; also names its export file.
    pub index: usize,
    pub tickers: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

/// Partition `tickers` into batches of at most `size`, keeping input order.
///
/// Only the last batch may be shorter than `size`. An empty input yields no
/// batches.
pub fn batches(tickers: &[String], size: usize) -> Result<Vec<Batch>, ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidBatchSize(size));
    }
    Ok(tickers
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            index: i + 1,
            tickers: chunk.to_vec(),
        })
        .collect())
}

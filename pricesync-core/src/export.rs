//! Per-batch JSON snapshots.
//!
//! Each batch with new rows produces `{prefix}_batch_{index:03}.json`, a
//! pretty-printed object mapping ticker to its new bars. Files are written
//! to a `.tmp` sibling and renamed into place, so a reader never sees a
//! half-written snapshot.

use crate::domain::PriceBar;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A snapshot file that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub tickers: usize,
    pub rows: usize,
    /// BLAKE3 hex digest of the file contents.
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct JsonExporter {
    output_dir: PathBuf,
    prefix: String,
}

impl JsonExporter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File name for batch `index`, e.g. `tiingo_prices_batch_001.json`.
    pub fn file_name(&self, index: usize) -> String {
        batch_file_name(&self.prefix, index)
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.output_dir.join(self.file_name(index))
    }

    /// Write the snapshot for batch `index`. Tickers with no rows are left out.
    pub fn write_batch(
        &self,
        index: usize,
        rows_by_ticker: &BTreeMap<String, Vec<PriceBar>>,
    ) -> Result<ExportedFile, ExportError> {
        let payload: BTreeMap<&str, &[PriceBar]> = rows_by_ticker
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(ticker, rows)| (ticker.as_str(), rows.as_slice()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&payload)?;

        fs::create_dir_all(&self.output_dir).map_err(|source| ExportError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let path = self.path_for(index);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes).map_err(|source| ExportError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(ExportError::Io { path, source });
        }

        let exported = ExportedFile {
            tickers: payload.len(),
            rows: payload.values().map(|rows| rows.len()).sum(),
            content_hash: blake3::hash(&bytes).to_hex().to_string(),
            path,
        };
        tracing::info!(
            path = %exported.path.display(),
            tickers = exported.tickers,
            rows = exported.rows,
            "wrote batch export"
        );
        Ok(exported)
    }
}

/// `{prefix}_batch_{index:03}.json`
pub fn batch_file_name(prefix: &str, index: usize) -> String {
    format!("{prefix}_batch_{index:03}.json")
}

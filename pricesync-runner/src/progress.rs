//! Operator-facing progress reporting for a sync run.

use crate::pipeline::{BatchReport, BatchStage, RunSummary};
use pricesync_core::data::{Batch, FetchError};

/// Observer for pipeline progress. All methods default to no-ops.
pub trait SyncProgress: Send + Sync {
    /// A batch is about to start. `total` is the number of batches in the run.
    fn on_batch_start(&self, _batch: &Batch, _total: usize) {}

    fn on_stage(&self, _batch: usize, _stage: BatchStage) {}

    /// One ticker's fetch finished; `Ok` carries the number of rows fetched.
    fn on_ticker(&self, _ticker: &str, _index: usize, _of: usize, _result: &Result<usize, FetchError>) {}

    fn on_batch_complete(&self, _report: &BatchReport) {}

    fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Reports nothing.
pub struct SilentProgress;

impl SyncProgress for SilentProgress {}

/// Prints progress lines to stdout.
pub struct StdoutProgress;

impl SyncProgress for StdoutProgress {
    fn on_batch_start(&self, batch: &Batch, total: usize) {
        println!(
            "[batch {}/{}] {} tickers: {}",
            batch.index,
            total,
            batch.len(),
            batch.tickers.join(", ")
        );
    }

    fn on_ticker(&self, ticker: &str, index: usize, of: usize, result: &Result<usize, FetchError>) {
        match result {
            Ok(rows) => println!("  [{}/{}] OK: {ticker} ({rows} rows)", index + 1, of),
            Err(e) => println!("  [{}/{}] FAIL: {e}", index + 1, of),
        }
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        let export = report
            .export
            .as_ref()
            .map(|f| format!(", exported {}", f.path.display()))
            .unwrap_or_default();
        println!(
            "  {} new, {} written{export}",
            report.rows_new, report.rows_written
        );
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        println!(
            "\nSync complete: {}/{} tickers succeeded, {} failed, {} rows written{}",
            summary.succeeded.len(),
            summary.total_tickers(),
            summary.failed.len(),
            summary.rows_written,
            if summary.dry_run { " (dry run)" } else { "" }
        );
    }
}

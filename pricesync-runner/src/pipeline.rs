//! Batch pipeline: fetch → filter → persist → export → upload.
//!
//! Batches run strictly in order and tickers within a batch run strictly in
//! order. A failing ticker is recorded and skipped; a failing batch step is
//! recorded and the run moves on. Only configuration problems abort a run,
//! and they are caught before the first request.

use crate::progress::{SilentProgress, SyncProgress};
use chrono::NaiveDate;
use pricesync_core::data::{batches, filter_new, Batch, FetchClient, FetchError};
use pricesync_core::domain::PriceBar;
use pricesync_core::error::check_date_range;
use pricesync_core::export::{ExportedFile, JsonExporter};
use pricesync_core::store::{PriceStore, StoreError};
use pricesync_core::upload::{RemoteFile, Uploader};
use pricesync_core::ConfigError;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

/// Parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Fetch and filter only: no store writes, no export file, no upload.
    pub dry_run: bool,
}

/// How far a batch got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Pending,
    Fetching,
    Filtering,
    Persisting,
    Done,
}

/// Why a ticker ended up in the failed list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("existing-row query failed: {0}")]
    StoreQuery(StoreError),

    #[error("store write failed: {0}")]
    StoreWrite(StoreError),
}

impl FailureCause {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::StoreQuery(_) => "store_query",
            Self::StoreWrite(_) => "store_write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerFailure {
    pub ticker: String,
    pub batch: usize,
    pub cause: FailureCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailureKind {
    Export,
    Upload,
}

/// A batch-level step that failed after the store writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub kind: BatchFailureKind,
    pub path: Option<PathBuf>,
    pub message: String,
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub index: usize,
    pub tickers: Vec<String>,
    /// Last stage reached. A batch whose store query failed stops at `Filtering`.
    pub stage: BatchStage,
    pub tickers_fetched: usize,
    pub rows_fetched: usize,
    pub rows_new: usize,
    pub rows_written: usize,
    pub export: Option<ExportedFile>,
    pub upload: Option<RemoteFile>,
}

impl BatchReport {
    fn new(batch: &Batch) -> Self {
        Self {
            index: batch.index,
            tickers: batch.tickers.clone(),
            stage: BatchStage::Pending,
            tickers_fetched: 0,
            rows_fetched: 0,
            rows_new: 0,
            rows_written: 0,
            export: None,
            upload: None,
        }
    }
}

/// Outcome of a whole run.
///
/// Every input ticker ends up in exactly one of `succeeded` or `failed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub dry_run: bool,
    pub batches: Vec<BatchReport>,
    pub succeeded: Vec<String>,
    pub failed: Vec<TickerFailure>,
    pub batch_failures: Vec<BatchFailure>,
    pub rows_fetched: usize,
    pub rows_new: usize,
    pub rows_deduplicated: usize,
    pub rows_written: usize,
    /// New rows that were not written: dry run, or their ticker's write failed.
    pub rows_skipped: usize,
    pub exports: Vec<ExportedFile>,
    pub uploads: Vec<RemoteFile>,
    pub requests_made: u64,
}

impl RunSummary {
    pub fn total_tickers(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// No ticker failed and no export or upload failed.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.batch_failures.is_empty()
    }

    pub fn failed_tickers(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.ticker.as_str()).collect()
    }

    /// Serializable rendering for `--summary-json`.
    pub fn report(&self) -> SummaryReport {
        SummaryReport {
            dry_run: self.dry_run,
            succeeded: self.succeeded.clone(),
            failed: self
                .failed
                .iter()
                .map(|f| FailureReport {
                    ticker: f.ticker.clone(),
                    batch: f.batch,
                    kind: f.cause.kind(),
                    error: f.cause.to_string(),
                })
                .collect(),
            batch_failures: self.batch_failures.clone(),
            batches: self.batches.clone(),
            rows_fetched: self.rows_fetched,
            rows_new: self.rows_new,
            rows_deduplicated: self.rows_deduplicated,
            rows_written: self.rows_written,
            rows_skipped: self.rows_skipped,
            requests_made: self.requests_made,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub ticker: String,
    pub batch: usize,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub dry_run: bool,
    pub succeeded: Vec<String>,
    pub failed: Vec<FailureReport>,
    pub batch_failures: Vec<BatchFailure>,
    pub batches: Vec<BatchReport>,
    pub rows_fetched: usize,
    pub rows_new: usize,
    pub rows_deduplicated: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub requests_made: u64,
}

/// Drives batches through the fetch client, store, exporter, and uploader.
pub struct Pipeline<'a> {
    fetcher: &'a FetchClient,
    store: &'a dyn PriceStore,
    exporter: &'a JsonExporter,
    uploader: Option<&'a dyn Uploader>,
    progress: &'a dyn SyncProgress,
    batch_size: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        fetcher: &'a FetchClient,
        store: &'a dyn PriceStore,
        exporter: &'a JsonExporter,
        batch_size: usize,
    ) -> Self {
        Self {
            fetcher,
            store,
            exporter,
            uploader: None,
            progress: &SilentProgress,
            batch_size,
        }
    }

    pub fn with_uploader(mut self, uploader: &'a dyn Uploader) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn SyncProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Run every batch in order.
    ///
    /// Returns `Err` only for configuration problems, before any request is
    /// made. Per-ticker and per-batch failures are recorded in the summary.
    /// A ticker repeated within one batch is processed once.
    pub fn run(&self, tickers: &[String], opts: &RunOptions) -> Result<RunSummary, ConfigError> {
        check_date_range(opts.start, opts.end)?;
        let planned = batches(tickers, self.batch_size)?;
        let requests_before = self.fetcher.requests_made();

        tracing::info!(
            tickers = tickers.len(),
            batches = planned.len(),
            start = %opts.start,
            end = %opts.end,
            dry_run = opts.dry_run,
            store = self.store.name(),
            "starting sync"
        );

        let mut summary = RunSummary {
            dry_run: opts.dry_run,
            ..RunSummary::default()
        };
        for batch in &planned {
            self.progress.on_batch_start(batch, planned.len());
            let report = self.run_batch(batch, opts, &mut summary);
            self.progress.on_batch_complete(&report);
            summary.batches.push(report);
        }
        summary.requests_made = self.fetcher.requests_made() - requests_before;

        tracing::info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            rows_written = summary.rows_written,
            rows_deduplicated = summary.rows_deduplicated,
            "sync finished"
        );
        self.progress.on_run_complete(&summary);
        Ok(summary)
    }

    fn enter(&self, report: &mut BatchReport, stage: BatchStage) {
        report.stage = stage;
        tracing::debug!(batch = report.index, ?stage, "batch stage");
        self.progress.on_stage(report.index, stage);
    }

    fn run_batch(&self, batch: &Batch, opts: &RunOptions, summary: &mut RunSummary) -> BatchReport {
        let mut report = BatchReport::new(batch);
        tracing::info!(batch = batch.index, tickers = batch.len(), "processing batch");

        // ── Fetching ──
        self.enter(&mut report, BatchStage::Fetching);
        let mut fetched: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
        let mut fetched_order: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, ticker) in batch.tickers.iter().enumerate() {
            if !seen.insert(ticker.as_str()) {
                tracing::warn!(ticker = %ticker, batch = batch.index, "ticker repeated in batch, skipping");
                continue;
            }
            let result = self.fetcher.fetch(ticker, opts.start, opts.end);
            let outcome = result.as_ref().map(Vec::len).map_err(FetchError::clone);
            self.progress.on_ticker(ticker, i, batch.len(), &outcome);
            match result {
                Ok(bars) => {
                    report.rows_fetched += bars.len();
                    fetched_order.push(ticker.clone());
                    fetched.insert(ticker.clone(), bars);
                }
                Err(e) => {
                    tracing::warn!(ticker = %ticker, batch = batch.index, error = %e, "fetch failed");
                    summary.failed.push(TickerFailure {
                        ticker: ticker.clone(),
                        batch: batch.index,
                        cause: FailureCause::Fetch(e),
                    });
                }
            }
        }
        report.tickers_fetched = fetched_order.len();
        summary.rows_fetched += report.rows_fetched;

        if fetched_order.is_empty() {
            self.enter(&mut report, BatchStage::Done);
            return report;
        }

        // ── Filtering ──
        self.enter(&mut report, BatchStage::Filtering);
        let existing = match self.store.existing_keys(&fetched_order, opts.start, opts.end) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(batch = batch.index, error = %e, "existing-row query failed");
                for ticker in fetched_order {
                    summary.failed.push(TickerFailure {
                        ticker,
                        batch: batch.index,
                        cause: FailureCause::StoreQuery(e.clone()),
                    });
                }
                return report;
            }
        };

        let mut new_rows: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
        for (ticker, bars) in fetched {
            let before = bars.len();
            let kept = filter_new(bars, &existing);
            summary.rows_deduplicated += before - kept.len();
            report.rows_new += kept.len();
            new_rows.insert(ticker, kept);
        }
        summary.rows_new += report.rows_new;

        if opts.dry_run {
            summary.rows_skipped += report.rows_new;
            summary.succeeded.extend(fetched_order);
            self.enter(&mut report, BatchStage::Done);
            return report;
        }

        // ── Persisting ──
        self.enter(&mut report, BatchStage::Persisting);
        for ticker in fetched_order {
            let rows = new_rows.get(&ticker).map(Vec::as_slice).unwrap_or_default();
            if rows.is_empty() {
                summary.succeeded.push(ticker);
                continue;
            }
            match self.store.insert(&ticker, rows) {
                Ok(written) => {
                    report.rows_written += written;
                    summary.succeeded.push(ticker);
                }
                Err(e) => {
                    tracing::warn!(
                        ticker = %ticker,
                        batch = batch.index,
                        written = e.written,
                        error = %e.source,
                        "store write failed"
                    );
                    report.rows_written += e.written;
                    summary.rows_skipped += rows.len().saturating_sub(e.written);
                    summary.failed.push(TickerFailure {
                        ticker,
                        batch: batch.index,
                        cause: FailureCause::StoreWrite(e.source),
                    });
                }
            }
        }
        summary.rows_written += report.rows_written;

        if report.rows_new > 0 {
            self.export_and_upload(batch.index, &new_rows, &mut report, summary);
        } else {
            tracing::info!(batch = batch.index, "no new rows, skipping export");
        }

        self.enter(&mut report, BatchStage::Done);
        report
    }

    fn export_and_upload(
        &self,
        index: usize,
        new_rows: &BTreeMap<String, Vec<PriceBar>>,
        report: &mut BatchReport,
        summary: &mut RunSummary,
    ) {
        let exported = match self.exporter.write_batch(index, new_rows) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(batch = index, error = %e, "export failed");
                summary.batch_failures.push(BatchFailure {
                    batch: index,
                    kind: BatchFailureKind::Export,
                    path: Some(self.exporter.path_for(index)),
                    message: e.to_string(),
                });
                return;
            }
        };
        summary.exports.push(exported.clone());
        report.export = Some(exported.clone());

        let Some(uploader) = self.uploader else {
            return;
        };
        match uploader.upload(&exported.path) {
            Ok(remote) => {
                summary.uploads.push(remote.clone());
                report.upload = Some(remote);
            }
            Err(e) => {
                tracing::warn!(batch = index, uploader = uploader.name(), error = %e, "upload failed");
                summary.batch_failures.push(BatchFailure {
                    batch: index,
                    kind: BatchFailureKind::Upload,
                    path: Some(exported.path),
                    message: e.to_string(),
                });
            }
        }
    }
}

//! pricesync runner: configuration, the batch pipeline, and run reporting.
//!
//! This crate builds on `pricesync-core` to provide:
//! - `SyncConfig` loaded from TOML with environment overrides
//! - `Pipeline`, which drives each batch through fetch, dedupe, store
//!   writes, JSON export, and upload
//! - `RunSummary` / `SummaryReport` describing what happened
//! - `SyncProgress` observers for operator output

pub mod config;
pub mod pipeline;
pub mod progress;

pub use config::SyncConfig;
pub use pipeline::{
    BatchFailure, BatchFailureKind, BatchReport, BatchStage, FailureCause, Pipeline, RunOptions,
    RunSummary, SummaryReport, TickerFailure,
};
pub use progress::{SilentProgress, StdoutProgress, SyncProgress};

use chrono::NaiveDate;
use pricesync_core::data::{Attempt, FetchCause, FetchClient, FetchError, PriceSource, RetryPolicy};
use pricesync_core::domain::PriceBar;
use pricesync_core::export::JsonExporter;
use pricesync_core::store::{MemoryStore, StoreError};
use pricesync_core::upload::{RemoteFile, UploadError, Uploader};
use pricesync_core::ConfigError;
use pricesync_runner::{BatchFailureKind, BatchStage, FailureCause, Pipeline, RunOptions};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fixtures ─────────────────────────────────────────────────────────

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn bar(ticker: &str, day: u32) -> PriceBar {
    let close = 100.0 + day as f64;
    PriceBar::new(ticker, d(day), close - 1.0, close + 1.0, close - 2.0, close, Some(close), 1_000)
        .unwrap()
}

fn tickers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn opts() -> RunOptions {
    RunOptions {
        start: d(1),
        end: d(5),
        dry_run: false,
    }
}

/// Price source that replays per-ticker scripts. Unscripted tickers are unknown.
#[derive(Default)]
struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Attempt<Vec<PriceBar>>>>>,
}

impl ScriptedSource {
    fn respond(self, ticker: &str, outcomes: Vec<Attempt<Vec<PriceBar>>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(ticker.to_string(), outcomes.into());
        self
    }

    fn bars(self, ticker: &str, days: &[u32]) -> Self {
        let bars = days.iter().map(|&day| bar(ticker, day)).collect();
        self.respond(ticker, vec![Attempt::Success(bars)])
    }
}

impl PriceSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_once(&self, ticker: &str, _: NaiveDate, _: NaiveDate) -> Attempt<Vec<PriceBar>> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(ticker)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Attempt::Permanent(FetchCause::InvalidTicker {
                    ticker: ticker.to_string(),
                })
            })
    }
}

fn client(source: ScriptedSource) -> (FetchClient, Arc<Mutex<Vec<Duration>>>) {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delays);
    let client = FetchClient::with_delay(Box::new(source), RetryPolicy::default(), move |d| {
        sink.lock().unwrap().push(d)
    });
    (client, delays)
}

#[derive(Default)]
struct RecordingUploader {
    uploaded: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl Uploader for RecordingUploader {
    fn name(&self) -> &str {
        "recording"
    }

    fn upload(&self, path: &Path) -> Result<RemoteFile, UploadError> {
        self.uploaded.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            return Err(UploadError::Api {
                status: 403,
                body: "insufficient permissions".into(),
            });
        }
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        Ok(RemoteFile {
            id: format!("remote-{name}"),
            name,
            web_view_link: None,
        })
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

// ── End to end ───────────────────────────────────────────────────────

#[test]
fn new_rows_are_written_exported_and_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[2, 3])
            .bars("BBB", &[2]),
    );
    let store = MemoryStore::with_rows([bar("AAA", 2)]);
    let exporter = JsonExporter::new(dir.path(), "tiingo_prices");
    let uploader = RecordingUploader::default();

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .with_uploader(&uploader)
        .run(&tickers(&["AAA", "BBB"]), &opts())
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.succeeded, vec!["AAA", "BBB"]);
    assert_eq!(summary.rows_fetched, 3);
    assert_eq!(summary.rows_deduplicated, 1);
    assert_eq!(summary.rows_new, 2);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.requests_made, 2);

    // One store query for the whole batch.
    let queries = store.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].tickers, vec!["AAA", "BBB"]);
    assert_eq!((queries[0].start, queries[0].end), (d(1), d(5)));

    assert_eq!(store.insert_calls(), vec!["AAA", "BBB"]);
    assert_eq!(store.rows().len(), 3);

    let path = dir.path().join("tiingo_prices_batch_001.json");
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["AAA"].as_array().unwrap().len(), 1);
    assert_eq!(json["AAA"][0]["date"], "2024-01-03");
    assert_eq!(json["BBB"][0]["date"], "2024-01-02");

    assert_eq!(*uploader.uploaded.lock().unwrap(), vec![path.clone()]);
    assert_eq!(summary.exports.len(), 1);
    assert_eq!(summary.exports[0].path, path);
    assert_eq!(summary.uploads[0].id, "remote-tiingo_prices_batch_001.json");
    assert_eq!(summary.batches[0].stage, BatchStage::Done);
}

#[test]
fn two_tickers_one_batch_with_one_stored_row() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[1, 2, 3])
            .bars("BBB", &[1, 2, 3]),
    );
    let store = MemoryStore::with_rows([bar("AAA", 2)]);
    let exporter = JsonExporter::new(dir.path(), "tiingo_prices");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 2)
        .run(
            &tickers(&["AAA", "BBB"]),
            &RunOptions {
                start: d(1),
                end: d(3),
                dry_run: false,
            },
        )
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.batches.len(), 1);
    assert_eq!(summary.rows_fetched, 6);
    assert_eq!(summary.rows_deduplicated, 1);
    assert_eq!(summary.rows_written, 5);
    assert_eq!(store.rows().len(), 6);

    assert_eq!(files_in(dir.path()), vec!["tiingo_prices_batch_001.json"]);
    let path = dir.path().join("tiingo_prices_batch_001.json");
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let aaa_dates: Vec<&str> = json["AAA"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["date"].as_str().unwrap())
        .collect();
    assert_eq!(aaa_dates, vec!["2024-01-01", "2024-01-03"]);
    assert_eq!(json["BBB"].as_array().unwrap().len(), 3);
}

#[test]
fn second_run_over_same_store_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let (first, _) = client(ScriptedSource::default().bars("AAA", &[2, 3]));
    Pipeline::new(&first, &store, &exporter, 8)
        .run(&tickers(&["AAA"]), &opts())
        .unwrap();
    std::fs::remove_file(dir.path().join("p_batch_001.json")).unwrap();

    let (second, _) = client(ScriptedSource::default().bars("AAA", &[2, 3]));
    let summary = Pipeline::new(&second, &store, &exporter, 8)
        .run(&tickers(&["AAA"]), &opts())
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.rows_deduplicated, 2);
    assert_eq!(summary.rows_written, 0);
    assert_eq!(store.rows().len(), 2);
    assert!(files_in(dir.path()).is_empty(), "no export without new rows");
}

#[test]
fn batches_run_in_order_with_one_export_each() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..10).map(|i| format!("T{i:02}")).collect();
    let source = names
        .iter()
        .fold(ScriptedSource::default(), |s, t| s.bars(t, &[2]));
    let (fetcher, _) = client(source);
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "tiingo_prices");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&names, &opts())
        .unwrap();

    let sizes: Vec<usize> = summary.batches.iter().map(|b| b.tickers.len()).collect();
    assert_eq!(sizes, vec![8, 2]);
    assert_eq!(store.queries().len(), 2);
    assert_eq!(summary.succeeded, names);
    assert_eq!(
        files_in(dir.path()),
        vec!["tiingo_prices_batch_001.json", "tiingo_prices_batch_002.json"]
    );
}

// ── Failure isolation ────────────────────────────────────────────────

#[test]
fn failed_ticker_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[2])
            .bars("CCC", &[2]),
    );
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA", "ZZZ", "CCC"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["AAA", "CCC"]);
    assert_eq!(summary.failed_tickers(), vec!["ZZZ"]);
    match &summary.failed[0].cause {
        FailureCause::Fetch(FetchError::Permanent { cause, .. }) => {
            assert!(matches!(cause, FetchCause::InvalidTicker { .. }))
        }
        other => panic!("expected permanent fetch failure, got {other:?}"),
    }
    assert_eq!(store.queries()[0].tickers, vec!["AAA", "CCC"]);
    assert_eq!(store.insert_calls(), vec!["AAA", "CCC"]);
    assert!(!summary.all_succeeded());

    let text = std::fs::read_to_string(dir.path().join("p_batch_001.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let exported: Vec<&String> = json.as_object().unwrap().keys().collect();
    assert_eq!(exported, vec!["AAA", "CCC"]);
}

#[test]
fn repeated_ticker_in_a_batch_is_processed_once() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(ScriptedSource::default().bars("AAA", &[2, 3]));
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA", "AAA"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["AAA"]);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.requests_made, 1);
    assert_eq!(store.insert_calls(), vec!["AAA"]);
    assert_eq!(store.rows().len(), 2);
}

#[test]
fn transient_failures_are_retried_inside_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, delays) = client(ScriptedSource::default().respond(
        "AAA",
        vec![
            Attempt::Transient(FetchCause::Server { status: 502 }),
            Attempt::Transient(FetchCause::RateLimited {
                retry_after_secs: None,
            }),
            Attempt::Success(vec![bar("AAA", 2)]),
        ],
    ));
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA"]), &opts())
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.requests_made, 3);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[test]
fn exhausted_retries_mark_only_that_ticker_failed() {
    let dir = tempfile::tempdir().unwrap();
    let transient = || Attempt::Transient(FetchCause::Network {
        message: "connection reset".into(),
    });
    let (fetcher, _) = client(
        ScriptedSource::default()
            .respond("AAA", vec![transient(), transient(), transient(), transient()])
            .bars("BBB", &[2]),
    );
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA", "BBB"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["BBB"]);
    assert!(matches!(
        summary.failed[0].cause,
        FailureCause::Fetch(FetchError::RetriesExhausted { attempts: 4, .. })
    ));
    assert_eq!(summary.requests_made, 5);
}

#[test]
fn store_query_failure_fails_the_batch_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[2])
            .bars("BBB", &[2]),
    );
    let store = MemoryStore::new();
    store.fail_queries();
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 1)
        .run(&tickers(&["AAA", "BBB"]), &opts())
        .unwrap();

    assert!(summary.succeeded.is_empty());
    assert_eq!(summary.failed_tickers(), vec!["AAA", "BBB"]);
    assert!(summary
        .failed
        .iter()
        .all(|f| matches!(f.cause, FailureCause::StoreQuery(StoreError::Api { .. }))));
    assert_eq!(store.queries().len(), 2, "second batch still ran");
    assert!(store.insert_calls().is_empty());
    assert!(summary.batches.iter().all(|b| b.stage == BatchStage::Filtering));
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn batch_with_nothing_fetched_skips_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(ScriptedSource::default());
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["ZZZ", "YYY"]), &opts())
        .unwrap();

    assert_eq!(summary.failed.len(), 2);
    assert!(store.queries().is_empty());
    assert_eq!(summary.batches[0].stage, BatchStage::Done);
}

#[test]
fn store_write_failure_is_scoped_to_its_ticker() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[2])
            .bars("BBB", &[2, 3]),
    );
    let store = MemoryStore::new();
    store.fail_inserts_for("BBB");
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA", "BBB"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["AAA"]);
    assert!(matches!(summary.failed[0].cause, FailureCause::StoreWrite(_)));
    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.rows_skipped, 2);

    // The snapshot records every new row fetched in the batch.
    assert_eq!(summary.exports[0].rows, 3);
}

#[test]
fn partial_store_write_counts_rows_already_stored() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[2])
            .bars("BBB", &[2, 3, 4]),
    );
    let store = MemoryStore::new();
    store.fail_inserts_after("BBB", 1);
    let exporter = JsonExporter::new(dir.path(), "p");

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA", "BBB"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["AAA"]);
    assert_eq!(summary.failed_tickers(), vec!["BBB"]);
    assert!(matches!(
        summary.failed[0].cause,
        FailureCause::StoreWrite(StoreError::Api { status: 400, .. })
    ));
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.rows_skipped, 2);
    assert_eq!(summary.batches[0].rows_written, 2);
    assert_eq!(store.rows().len(), summary.rows_written);
    assert_eq!(summary.rows_new, summary.rows_written + summary.rows_skipped);
}

#[test]
fn upload_failure_is_recorded_and_keeps_store_writes() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(ScriptedSource::default().bars("AAA", &[2]));
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");
    let uploader = RecordingUploader {
        fail: true,
        ..RecordingUploader::default()
    };

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .with_uploader(&uploader)
        .run(&tickers(&["AAA"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["AAA"]);
    assert_eq!(store.rows().len(), 1);
    assert_eq!(summary.batch_failures.len(), 1);
    assert_eq!(summary.batch_failures[0].kind, BatchFailureKind::Upload);
    assert!(summary.uploads.is_empty());
    assert!(!summary.all_succeeded());
    assert_eq!(files_in(dir.path()), vec!["p_batch_001.json"]);
}

#[test]
fn export_failure_is_recorded_per_batch() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the output directory should be.
    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"").unwrap();

    let (fetcher, _) = client(ScriptedSource::default().bars("AAA", &[2]));
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(&blocked, "p");
    let uploader = RecordingUploader::default();

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .with_uploader(&uploader)
        .run(&tickers(&["AAA"]), &opts())
        .unwrap();

    assert_eq!(summary.succeeded, vec!["AAA"]);
    assert_eq!(summary.batch_failures[0].kind, BatchFailureKind::Export);
    assert!(uploader.uploaded.lock().unwrap().is_empty());
    assert_eq!(store.rows().len(), 1);
}

// ── Dry run ──────────────────────────────────────────────────────────

#[test]
fn dry_run_fetches_and_filters_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(
        ScriptedSource::default()
            .bars("AAA", &[2, 3])
            .bars("BBB", &[2]),
    );
    let store = MemoryStore::with_rows([bar("AAA", 2)]);
    let exporter = JsonExporter::new(dir.path(), "p");
    let uploader = RecordingUploader::default();

    let summary = Pipeline::new(&fetcher, &store, &exporter, 8)
        .with_uploader(&uploader)
        .run(
            &tickers(&["AAA", "BBB"]),
            &RunOptions {
                dry_run: true,
                ..opts()
            },
        )
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.succeeded, vec!["AAA", "BBB"]);
    assert_eq!(summary.rows_new, 2);
    assert_eq!(summary.rows_skipped, 2);
    assert_eq!(summary.rows_written, 0);
    assert_eq!(store.queries().len(), 1);
    assert!(store.insert_calls().is_empty());
    assert_eq!(store.rows().len(), 1);
    assert!(files_in(dir.path()).is_empty());
    assert!(uploader.uploaded.lock().unwrap().is_empty());
}

// ── Configuration errors ─────────────────────────────────────────────

#[test]
fn config_errors_abort_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = client(ScriptedSource::default().bars("AAA", &[2]));
    let store = MemoryStore::new();
    let exporter = JsonExporter::new(dir.path(), "p");

    let err = Pipeline::new(&fetcher, &store, &exporter, 0)
        .run(&tickers(&["AAA"]), &opts())
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBatchSize(0)));

    let inverted = RunOptions {
        start: d(5),
        end: d(1),
        dry_run: false,
    };
    let err = Pipeline::new(&fetcher, &store, &exporter, 8)
        .run(&tickers(&["AAA"]), &inverted)
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidDateRange { .. }));

    assert_eq!(fetcher.requests_made(), 0);
    assert!(store.queries().is_empty());
}

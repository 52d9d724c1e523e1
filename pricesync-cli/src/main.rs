//! pricesync CLI: sync end-of-day prices from Tiingo into Notion and Drive.
//!
//! Commands:
//! - `sync`: fetch, dedupe against the store, write rows, export and upload per batch
//! - `plan`: print the batches and export file names a sync would produce

mod logging;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use logging::{init_logging, LogFormat};
use pricesync_core::data::{batches, load_tickers, FetchClient, TiingoSource};
use pricesync_core::export::{batch_file_name, JsonExporter};
use pricesync_core::store::{MemoryStore, NotionStore, PriceStore};
use pricesync_core::upload::DriveUploader;
use pricesync_runner::{Pipeline, RunOptions, RunSummary, StdoutProgress, SyncConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Days fetched when `--start` is not given.
const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Start date used by `--full-history`; earlier than any Tiingo series.
const FULL_HISTORY_START: &str = "1900-01-01";

#[derive(Parser)]
#[command(
    name = "pricesync",
    version,
    about = "Sync Tiingo end-of-day prices into Notion and Google Drive"
)]
struct Cli {
    /// TOML config file. Environment variables override it; flags override both.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Env file loaded before reading the environment. Defaults to `.env`
    /// in the current directory or a parent, when present.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Log level filter (RUST_LOG takes precedence).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch prices, write new rows to the store, export and upload each batch.
    Sync(SyncArgs),
    /// Show how tickers would be batched and which export files would be written.
    Plan {
        /// JSON file holding an array of ticker symbols.
        #[arg(long)]
        tickers: PathBuf,

        /// Tickers per batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Prefix for export file names.
        #[arg(long)]
        json_prefix: Option<String>,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// JSON file holding an array of ticker symbols.
    #[arg(long)]
    tickers: PathBuf,

    /// Start date (YYYY-MM-DD). Defaults to 7 days before the end date.
    #[arg(long)]
    start: Option<String>,

    /// Fetch all available history instead of the default lookback.
    #[arg(long, default_value_t = false, conflicts_with = "start")]
    full_history: bool,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Tickers per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Directory for JSON exports.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Prefix for export file names.
    #[arg(long)]
    json_prefix: Option<String>,

    /// Notion title property holding the ticker.
    #[arg(long)]
    notion_ticker_property: Option<String>,

    /// Notion date property holding the bar date.
    #[arg(long)]
    notion_date_property: Option<String>,

    /// Where rows are deduplicated against and written to.
    #[arg(long, value_enum, default_value_t = StoreKind::Notion)]
    store: StoreKind,

    /// Skip the Google Drive upload even when it is configured.
    #[arg(long, default_value_t = false)]
    no_upload: bool,

    /// Fetch and filter only: no store writes, no export files, no upload.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Write the run summary as JSON to this file.
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Notion,
    /// In-process store, starts empty; for offline checks.
    Memory,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    let env = load_env(cli.env_file.as_deref())?;
    match cli.command {
        Commands::Sync(args) => run_sync(cli.config.as_deref(), &env, args),
        Commands::Plan {
            tickers,
            batch_size,
            json_prefix,
        } => run_plan(cli.config.as_deref(), &env, &tickers, batch_size, json_prefix),
    }
}

/// Process environment after loading the env file into it. Variables
/// already set in the process keep their values.
fn load_env(env_file: Option<&Path>) -> Result<HashMap<String, String>> {
    match env_file {
        Some(path) => dotenvy::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display()))?,
        None => {
            if let Ok(path) = dotenvy::dotenv() {
                tracing::debug!(path = %path.display(), "loaded .env");
            }
        }
    }
    Ok(std::env::vars().collect())
}

fn run_sync(config_path: Option<&Path>, env: &HashMap<String, String>, args: SyncArgs) -> Result<()> {
    let mut config = SyncConfig::load(config_path, env)?;
    apply_sync_overrides(&mut config, &args);
    config.validate()?;

    let tickers = load_tickers(&args.tickers)?;
    let today = chrono::Local::now().date_naive();
    let (start, end) = resolve_dates(
        args.start.as_deref(),
        args.end.as_deref(),
        args.full_history,
        today,
    )?;

    let source = TiingoSource::with_base_url(
        config.tiingo_api_key()?,
        config.timeout(),
        config.tiingo.base_url.as_str(),
    )
    .context("failed to build Tiingo HTTP client")?;
    let fetcher = FetchClient::new(Box::new(source), config.retry_policy());

    let store: Box<dyn PriceStore> = match args.store {
        StoreKind::Notion => {
            let (api_key, database_id) = config.notion_credentials()?;
            let notion = NotionStore::new(
                api_key,
                database_id,
                config.notion.properties.clone(),
                config.timeout(),
            )
            .context("failed to build Notion HTTP client")?
            .with_page_size(config.notion.page_size)
            .with_max_pages(config.notion.max_pages);
            Box::new(notion)
        }
        StoreKind::Memory => Box::new(MemoryStore::new()),
    };

    let exporter = JsonExporter::new(&config.export.output_dir, config.export.json_prefix.as_str());

    let uploader = match (args.no_upload || args.dry_run, config.drive_target()) {
        (false, Some((token, folder))) => Some(
            DriveUploader::new(token, folder, config.timeout())
                .context("failed to build Drive HTTP client")?,
        ),
        (false, None) => {
            tracing::info!("Google Drive not configured, exports stay local");
            None
        }
        (true, _) => None,
    };

    let mut pipeline = Pipeline::new(&fetcher, store.as_ref(), &exporter, config.batch.size)
        .with_progress(&StdoutProgress);
    if let Some(uploader) = &uploader {
        pipeline = pipeline.with_uploader(uploader);
    }

    let summary = pipeline.run(
        &tickers,
        &RunOptions {
            start,
            end,
            dry_run: args.dry_run,
        },
    )?;

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary.report())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    report_failures(&summary);
    if !summary.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_plan(
    config_path: Option<&Path>,
    env: &HashMap<String, String>,
    tickers_path: &Path,
    batch_size: Option<usize>,
    json_prefix: Option<String>,
) -> Result<()> {
    let mut config = SyncConfig::load(config_path, env)?;
    if let Some(size) = batch_size {
        config.batch.size = size;
    }
    if let Some(prefix) = json_prefix {
        config.export.json_prefix = prefix;
    }
    config.validate()?;

    let tickers = load_tickers(tickers_path)?;
    let planned = batches(&tickers, config.batch.size)?;

    println!(
        "{} tickers in {} batches of up to {}",
        tickers.len(),
        planned.len(),
        config.batch.size
    );
    println!();
    println!("{:<7} {:>7}  {:<34} Tickers", "Batch", "Count", "Export file");
    println!("{}", "-".repeat(70));
    for batch in &planned {
        println!(
            "{:<7} {:>7}  {:<34} {}",
            batch.index,
            batch.len(),
            batch_file_name(&config.export.json_prefix, batch.index),
            batch.tickers.join(" ")
        );
    }
    Ok(())
}

/// Flags win over file and environment.
fn apply_sync_overrides(config: &mut SyncConfig, args: &SyncArgs) {
    if let Some(size) = args.batch_size {
        config.batch.size = size;
    }
    if let Some(dir) = &args.output_dir {
        config.export.output_dir = dir.clone();
    }
    if let Some(prefix) = &args.json_prefix {
        config.export.json_prefix = prefix.clone();
    }
    if let Some(prop) = &args.notion_ticker_property {
        config.notion.properties.ticker = prop.clone();
    }
    if let Some(prop) = &args.notion_date_property {
        config.notion.properties.date = prop.clone();
    }
}

/// `end` defaults to `today`; `start` to `end` minus the lookback, or to
/// [`FULL_HISTORY_START`] when `full_history` is set.
fn resolve_dates(
    start: Option<&str>,
    end: Option<&str>,
    full_history: bool,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate)> {
    let end = end.map(parse_date).transpose()?.unwrap_or(today);
    let start = match start {
        Some(s) => parse_date(s)?,
        None if full_history => parse_date(FULL_HISTORY_START)?,
        None => end - chrono::Duration::days(DEFAULT_LOOKBACK_DAYS),
    };
    Ok((start, end))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date {s:?}, expected YYYY-MM-DD"))
}

fn report_failures(summary: &RunSummary) {
    for failure in &summary.failed {
        eprintln!(
            "Error for {} (batch {}): {}",
            failure.ticker, failure.batch, failure.cause
        );
    }
    for failure in &summary.batch_failures {
        eprintln!(
            "Batch {} {:?} failed: {}",
            failure.batch, failure.kind, failure.message
        );
    }
}

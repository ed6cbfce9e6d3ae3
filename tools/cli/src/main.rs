//! indexsync CLI - keep a search index in step with a relational table.
//!
//! This tool runs one-shot full or incremental syncs, or a scheduler that
//! keeps running incremental syncs until interrupted.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use indexsync_source::{SourceTimeZone, SqliteSource};
use indexsync_store::{create_default_registry, DocumentStore};
use indexsync_sync::{
    CronSchedule, IncrementalJob, Scheduler, SyncConfig, SyncEngine, SyncStatus, SyncStatusEntry,
    SyncTarget, Trigger, DEFAULT_STATE_FILE,
};

#[derive(Parser)]
#[command(name = "indexsync")]
#[command(about = "indexsync - Relational table to search index synchronization")]
#[command(version)]
struct Cli {
    /// Load environment variables from this file (default: ./.env if present).
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// SQLite database to read rows from.
    #[arg(long, env = "SOURCE_DATABASE")]
    source_db: Option<PathBuf>,

    /// Zone of zone-less source timestamps: "local", "utc" or an offset
    /// such as "+09:00".
    #[arg(long, env = "SOURCE_TIMEZONE", default_value = "local")]
    source_timezone: SourceTimeZone,

    /// Document store backend: "meilisearch" or "memory".
    #[arg(long, default_value = "meilisearch")]
    store: String,

    /// Meilisearch address.
    #[arg(long, env = "MEILISEARCH_HOST", default_value = "http://localhost:7700")]
    meili_host: String,

    /// Meilisearch API key.
    #[arg(long, env = "MEILISEARCH_API_KEY", hide_env_values = true)]
    meili_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Source table.
    #[arg(short, long)]
    table: String,

    /// Primary key field.
    #[arg(short = 'k', long)]
    primary_key: String,

    /// Target index (default: the table name).
    #[arg(short, long)]
    index: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> SyncTarget {
        let target = SyncTarget::new(&self.table, &self.primary_key);
        match &self.index {
            Some(index) => target.with_collection(index),
            None => target,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild an index from the whole table.
    FullSync {
        #[command(flatten)]
        target: TargetArgs,

        /// Delete and recreate the index first.
        #[arg(long)]
        recreate: bool,

        /// Write in batches of this many documents.
        #[arg(long, conflicts_with = "retries")]
        batch_size: Option<usize>,

        /// Retry the whole sync up to this many attempts.
        #[arg(long)]
        retries: Option<u32>,

        /// Record the current time as the table's watermark afterwards.
        #[arg(long)]
        save_state: bool,

        /// Watermark file.
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
    },

    /// Apply rows changed since the last sync.
    IncrementalSync {
        #[command(flatten)]
        target: TargetArgs,

        /// Column holding each row's modification time.
        #[arg(short, long)]
        modified_column: String,

        /// Column flagging soft-deleted rows (1 = deleted).
        #[arg(long)]
        soft_delete_column: Option<String>,

        /// Watermark file.
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
    },

    /// Run incremental syncs until interrupted.
    Schedule {
        #[command(flatten)]
        target: TargetArgs,

        /// Column holding each row's modification time.
        #[arg(short, long)]
        modified_column: String,

        /// Column flagging soft-deleted rows (1 = deleted).
        #[arg(long)]
        soft_delete_column: Option<String>,

        /// Seconds between cycles.
        #[arg(long, default_value_t = 300, conflicts_with = "cron")]
        interval: u64,

        /// Five-field cron expression, evaluated in local time.
        #[arg(long)]
        cron: Option<String>,

        /// Watermark file.
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
    },

    /// Check that the document store is reachable.
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Env-backed flags are resolved while parsing, so parse again once the
    // env file has been applied.
    let env_file = match load_env_file(cli.env_file.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    if let Some(path) = env_file {
        info!("Loaded environment from {}", path.display());
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = open_store(&cli)?;

    match &cli.command {
        Commands::Health => cmd_health(store.as_ref()).await,

        Commands::FullSync {
            target,
            recreate,
            batch_size,
            retries,
            save_state,
            state_file,
        } => {
            let engine = open_engine(&cli, store, state_file)?;
            cmd_full_sync(
                &engine,
                &target.target(),
                *recreate,
                *batch_size,
                *retries,
                *save_state,
            )
            .await
        }

        Commands::IncrementalSync {
            target,
            modified_column,
            soft_delete_column,
            state_file,
        } => {
            let engine = open_engine(&cli, store, state_file)?;
            cmd_incremental_sync(
                &engine,
                &target.target(),
                modified_column,
                soft_delete_column.as_deref(),
            )
            .await
        }

        Commands::Schedule {
            target,
            modified_column,
            soft_delete_column,
            interval,
            cron,
            state_file,
        } => {
            let trigger = match cron {
                Some(expression) => Trigger::Cron(
                    CronSchedule::parse(expression).context("Invalid --cron expression")?,
                ),
                None => Trigger::Interval(Duration::from_secs(*interval)),
            };
            let mut job = IncrementalJob::new(target.target(), modified_column);
            if let Some(column) = soft_delete_column {
                job = job.with_soft_delete_column(column);
            }

            let engine = open_engine(&cli, store, state_file)?;
            cmd_schedule(Arc::new(engine), job, trigger, state_file).await
        }
    }
}

/// Apply `path`, or `./.env` when no path is given and one exists.
///
/// Variables already set in the process environment are kept.
fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv() {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(e).context("Failed to load .env"),
        },
    }
}

/// Resolve the configured document store.
fn open_store(cli: &Cli) -> Result<Arc<dyn DocumentStore>> {
    let config = match cli.store.as_str() {
        "meilisearch" => {
            let Some(key) = &cli.meili_key else {
                bail!("MEILISEARCH_API_KEY (or --meili-key) is required");
            };
            serde_json::json!({ "host": cli.meili_host, "api_key": key })
        }
        _ => serde_json::Value::Null,
    };

    create_default_registry()
        .resolve(&cli.store, config)
        .with_context(|| format!("Failed to open '{}' store", cli.store))
}

/// Build an engine over the configured source database.
fn open_engine(cli: &Cli, store: Arc<dyn DocumentStore>, state_file: &Path) -> Result<SyncEngine> {
    let Some(path) = &cli.source_db else {
        bail!("SOURCE_DATABASE (or --source-db) is required");
    };
    let source = SqliteSource::new(path)
        .with_context(|| format!("Failed to open source database {}", path.display()))?
        .with_time_zone(cli.source_timezone);

    let config = SyncConfig {
        state_file: state_file.to_path_buf(),
        ..SyncConfig::default()
    };
    Ok(SyncEngine::new(Arc::new(source), store, config))
}

/// Load persisted watermarks if the state file exists.
async fn load_state_if_present(engine: &SyncEngine) -> Result<()> {
    let path = &engine.config().state_file;
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        engine
            .load_sync_state()
            .await
            .with_context(|| format!("Failed to load state from {}", path.display()))?;
    } else {
        info!("No state file at {}, starting fresh", path.display());
    }
    Ok(())
}

async fn cmd_health(store: &dyn DocumentStore) -> Result<()> {
    let health = store.health().await.context("Health check failed")?;
    if !health.is_available() {
        bail!("Store '{}' reports status '{}'", store.name(), health.status);
    }
    println!("{}: {}", store.name(), health.status);
    Ok(())
}

async fn cmd_full_sync(
    engine: &SyncEngine,
    target: &SyncTarget,
    recreate: bool,
    batch_size: Option<usize>,
    retries: Option<u32>,
    save_state: bool,
) -> Result<()> {
    let start = Utc::now();

    let (status, records, failure) = if let Some(batch_size) = batch_size {
        let result = engine.full_sync_batch(target, batch_size, recreate).await?;
        for batch in &result.failed_batch_info {
            warn!(
                "Batch {} ({} records) failed: {}",
                batch.batch_number, batch.record_count, batch.error
            );
        }
        println!("{}", serde_json::to_string_pretty(&result)?);
        let status = if result.success {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        let failure = (!result.success)
            .then(|| format!("{} batch(es) failed", result.failed_batches));
        (status, result.successful_records as u64, failure)
    } else if let Some(retries) = retries {
        let result = engine.full_sync_with_retry(target, recreate, retries).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        if result.success {
            report_counts(result.source_count, result.target_count);
            (SyncStatus::Success, result.source_count.unwrap_or(0), None)
        } else {
            (SyncStatus::Failed, 0, result.error)
        }
    } else {
        let result = engine.full_sync(target, recreate).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        report_counts(Some(result.source_count), Some(result.target_count));
        (SyncStatus::Success, result.source_count, None)
    };

    log_run(&target.table, start, records, status);

    if let Some(message) = failure {
        bail!("Full sync of '{}' failed: {}", target.table, message);
    }

    if save_state {
        engine.save_last_sync_timestamp(&target.table, Utc::now()).await;
        engine.persist_sync_state().await?;
    }
    Ok(())
}

/// Log the status entry of a one-shot run.
fn log_run(
    table: &str,
    start: DateTime<Utc>,
    record_count: u64,
    status: SyncStatus,
) -> SyncStatusEntry {
    let entry = SyncStatusEntry {
        table: table.to_string(),
        start_time: start,
        end_time: Utc::now(),
        record_count,
        status,
    };
    let elapsed_ms = (entry.end_time - entry.start_time).num_milliseconds();

    match status {
        SyncStatus::Success => info!(
            "Sync of '{}' succeeded: {} record(s) in {}ms",
            table, record_count, elapsed_ms
        ),
        _ => warn!(
            "Sync of '{}' ended {:?}: {} record(s) in {}ms",
            table, status, record_count, elapsed_ms
        ),
    }
    entry
}

fn report_counts(source_count: Option<u64>, target_count: Option<u64>) {
    if let (Some(source), Some(target)) = (source_count, target_count) {
        if source != target {
            warn!("Count mismatch: {} source rows, {} index documents", source, target);
        }
    }
}

async fn cmd_incremental_sync(
    engine: &SyncEngine,
    target: &SyncTarget,
    modified_column: &str,
    soft_delete_column: Option<&str>,
) -> Result<()> {
    load_state_if_present(engine).await?;

    let start = Utc::now();
    let result = engine
        .incremental_sync(target, modified_column, soft_delete_column)
        .await;

    match result {
        Ok(result) => {
            log_run(&target.table, start, result.changed_count, SyncStatus::Success);
            engine.persist_sync_state().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            log_run(&target.table, start, 0, SyncStatus::Failed);
            Err(e).context(format!("Incremental sync of '{}' failed", target.table))
        }
    }
}

async fn cmd_schedule(
    engine: Arc<SyncEngine>,
    job: IncrementalJob,
    trigger: Trigger,
    state_file: &Path,
) -> Result<()> {
    load_state_if_present(&engine).await?;

    let scheduler = Scheduler::new(engine, job, trigger).with_state_file(state_file);
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, stopping scheduler");

    scheduler.stop().await;
    Ok(())
}

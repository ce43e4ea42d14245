//! crewlog-sync - keep the team database in step with agent session logs
//!
//! Runs a full sync of every session under the session root, then watches the
//! root and re-syncs each session once its logs stop changing.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/crewlog/crewlog.db (~/.local/share/crewlog/crewlog.db)
//! - Logs: $XDG_STATE_HOME/crewlog/crewlog.log (~/.local/state/crewlog/crewlog.log)
//! - Config: $XDG_CONFIG_HOME/crewlog/config.toml (~/.config/crewlog/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use crewlog_core::config::WatchConfig;
use crewlog_core::{Config, Database, NotifyWatch, SessionSynchronizer, SessionWatcher, SyncResult};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_sync_guard;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Synchronizer = SessionSynchronizer<Database>;

#[derive(Parser)]
#[command(name = "crewlog-sync")]
#[command(about = "Sync agent session logs into the team database")]
#[command(version)]
struct Args {
    /// Session root directory (overrides [source] root)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Run the initial sync and exit without watching
    #[arg(long)]
    once: bool,

    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Quiet period before a changed session is re-synced (overrides [watch] debounce_ms)
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Verbose output (-v per-session errors and debug logs, -vv trace logs)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(root) = &args.root {
        config.source.root = Some(root.clone());
    }
    if let Some(ms) = args.debounce_ms {
        config.watch.debounce_ms = ms;
    }
    match args.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    config.validate().context("invalid configuration")?;

    let _log_guard =
        crewlog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("crewlog-sync starting");

    let root = config.source.resolve_root();
    if !root.is_dir() {
        tracing::error!(root = %root.display(), "Session root not found");
        anyhow::bail!("session root not found: {}", root.display());
    }
    // Watcher events carry canonical paths
    let root = root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", root.display()))?;

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    let _sync_guard = acquire_sync_guard(&db_path).context("failed to acquire process lock")?;

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());
    println!("Sessions: {}", root.display());

    let sync = Arc::new(SessionSynchronizer::with_config(
        Arc::new(db),
        config.sync.clone(),
    ));

    run_initial_sync(&sync, &root, args.verbose)?;

    if args.once {
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_watch_mode(sync, root, config.watch))
}

/// Full scan and sync with a progress bar
fn run_initial_sync(sync: &Synchronizer, root: &Path, verbose: u8) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let result = sync
        .sync_all_with_progress(root, |current, total, session_id| {
            if current == 0 {
                pb.set_length(total as u64);
            }
            pb.set_position(current as u64);
            pb.set_message(session_id.to_string());
        })
        .context("sync failed")?;

    pb.finish_and_clear();
    print_sync_result(&result, verbose);

    tracing::info!(
        sessions_synced = result.sessions_synced,
        messages_inserted = result.messages_inserted,
        "Initial sync complete"
    );

    Ok(())
}

/// Watch the root until Ctrl+C, re-syncing sessions as they settle
async fn run_watch_mode(sync: Arc<Synchronizer>, root: PathBuf, watch: WatchConfig) -> Result<()> {
    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        let _ = stop_tx.send(());
    })
    .context("failed to set Ctrl+C handler")?;

    let fs = NotifyWatch::new().context("failed to create filesystem watcher")?;
    let callback_root = root.clone();
    let watcher = SessionWatcher::start(&root, fs, &watch, move |session_id| {
        // Store writes are blocking; keep them off the async workers
        tokio::task::block_in_place(|| on_session_settled(&sync, &callback_root, session_id));
    })
    .context("failed to start session watcher")?;

    println!(
        "Watching for changes (debounce {}ms). Press Ctrl+C to stop.",
        watch.debounce_ms
    );

    let _ = stop_rx.recv().await;
    watcher.stop().await;

    println!("Watch mode stopped.");
    tracing::info!("crewlog-sync watch mode stopped");
    Ok(())
}

/// Re-sync one session and announce the update
fn on_session_settled(sync: &Synchronizer, root: &Path, session_id: &str) {
    match sync.sync_one(root, session_id) {
        Ok(stats) => {
            tracing::info!(
                event = "session_updated",
                session_id,
                conversations = stats.conversations,
                messages = stats.messages_inserted,
                traces = stats.traces_inserted,
                "Session updated"
            );
            let timestamp = chrono::Local::now().format("%H:%M:%S");
            println!(
                "[{}] session_updated {}: {} messages, {} traces",
                timestamp, session_id, stats.messages_inserted, stats.traces_inserted
            );
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "Session re-sync failed");
            eprintln!("Failed to sync {}: {}", session_id, e);
        }
    }
}

/// Print sync result summary
fn print_sync_result(result: &SyncResult, verbose: u8) {
    println!("\nSync complete:");
    println!("  Sessions found:    {}", result.sessions_found);
    println!("  Sessions synced:   {}", result.sessions_synced);
    println!("  Messages inserted: {}", result.messages_inserted);
    println!("  Traces inserted:   {}", result.traces_inserted);

    if !result.errors.is_empty() {
        println!("\nErrors ({}):", result.errors.len());
        if verbose >= 1 {
            for (session_id, err) in &result.errors {
                println!("  {}: {}", session_id, err);
            }
        } else {
            println!("  (run with -v for details)");
        }
    }
}

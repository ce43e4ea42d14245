//! Directory watcher that turns log writes into debounced per-session updates.
//!
//! Watched directories are the session root, every session directory directly
//! under it, and each session's `subagents` directory. Directories created while
//! running are picked up from their create events.
//!
//! A changed path maps to a session id:
//!
//! | Relative path | Session |
//! |---------------|---------|
//! | `{id}.jsonl` | `id` |
//! | `{id}/subagents/{agent}.jsonl` | `id` |
//! | anything else | ignored |
//!
//! Each change restarts the session's quiet period. Once a session has been
//! quiet for the debounce interval the callback runs once for it.

mod fs;
mod pending;

pub use fs::{FsEvent, FsEventKind, FsWatch, NotifyWatch};
pub use pending::PendingSessions;

use crate::config::WatchConfig;
use crate::error::Result;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Callback invoked with the id of each session whose logs settled.
pub type UpdateCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Session id for a changed log path under `root`.
pub fn extract_session_id(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [file] => Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string),
        [session, "subagents", _, ..] => Some(session.to_string()),
        _ => None,
    }
}

fn is_log_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}

/// Running watcher. Dropping it without [`stop`](Self::stop) leaves the tasks
/// running until the runtime shuts down.
pub struct SessionWatcher {
    shutdown: watch::Sender<bool>,
    event_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
}

impl SessionWatcher {
    /// Start watching `root` with the given event source.
    ///
    /// Must be called inside a tokio runtime. Fails if `root` itself cannot be
    /// watched; session directories that cannot be watched are logged and skipped.
    /// `on_update` runs on the watcher's tick task, one session at a time.
    pub fn start<W, F>(root: &Path, mut fs: W, config: &WatchConfig, on_update: F) -> Result<Self>
    where
        W: FsWatch,
        F: Fn(&str) + Send + Sync + 'static,
    {
        let root = root.to_path_buf();
        fs.watch(&root)?;
        for dir in initial_dirs(&root)? {
            if let Err(e) = fs.watch(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to watch directory");
            }
        }

        tracing::info!(
            root = %root.display(),
            debounce_ms = config.debounce_ms,
            "Session watcher started"
        );

        let pending = Arc::new(Mutex::new(PendingSessions::default()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let on_update: UpdateCallback = Arc::new(on_update);

        let event_task = tokio::spawn(run_events(
            root,
            fs,
            Arc::clone(&pending),
            shutdown_rx.clone(),
        ));
        let tick_task = tokio::spawn(run_ticks(
            pending,
            config.debounce(),
            config.tick(),
            on_update,
            shutdown_rx,
        ));

        Ok(Self {
            shutdown,
            event_task,
            tick_task,
        })
    }

    /// Signal both tasks to exit and wait for them.
    ///
    /// A callback already running is allowed to finish; pending sessions that
    /// have not settled are dropped.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.event_task.await {
            tracing::warn!(error = %e, "Watcher event task failed");
        }
        if let Err(e) = self.tick_task.await {
            tracing::warn!(error = %e, "Watcher tick task failed");
        }
        tracing::info!("Session watcher stopped");
    }
}

/// Session directories and their `subagents` directories that exist now.
fn initial_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let subagents = dir.join("subagents");
        dirs.push(dir);
        if subagents.is_dir() {
            dirs.push(subagents);
        }
    }
    dirs.sort();
    Ok(dirs)
}

async fn run_events<W: FsWatch>(
    root: PathBuf,
    mut fs: W,
    pending: Arc<Mutex<PendingSessions>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = fs.next_event() => match event {
                Some(event) => handle_event(&root, &mut fs, &pending, event),
                None => {
                    tracing::warn!("Filesystem event source closed");
                    break;
                }
            },
        }
    }
}

fn handle_event<W: FsWatch>(
    root: &Path,
    fs: &mut W,
    pending: &Mutex<PendingSessions>,
    event: FsEvent,
) {
    if event.kind == FsEventKind::Create && event.path.is_dir() {
        let subagents = event.path.join("subagents");
        for dir in [Some(event.path.as_path()), subagents.is_dir().then_some(subagents.as_path())]
            .into_iter()
            .flatten()
        {
            match fs.watch(dir) {
                Ok(()) => tracing::debug!(dir = %dir.display(), "Watching new directory"),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to watch new directory")
                }
            }
        }
        return;
    }

    if !is_log_file(&event.path) {
        return;
    }

    if let Some(session_id) = extract_session_id(root, &event.path) {
        tracing::trace!(session_id = %session_id, path = %event.path.display(), "Session log changed");
        pending.lock().unwrap().touch(&session_id, Instant::now());
    }
}

async fn run_ticks(
    pending: Arc<Mutex<PendingSessions>>,
    debounce: Duration,
    tick: Duration,
    on_update: UpdateCallback,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let ready = pending.lock().unwrap().take_ready(Instant::now(), debounce);
                for session_id in ready {
                    tracing::debug!(session_id = %session_id, "Session settled");
                    on_update(&session_id);
                }
            }
        }
    }
}

//! Filesystem event source.

use crate::error::Result;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Write,
}

/// A create or write observed under a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

/// Non-recursive directory watching.
///
/// Only create and write events are reported. Implementations must make
/// `next_event` cancel-safe: dropping the future must not lose an event.
pub trait FsWatch: Send + 'static {
    /// Start reporting events for entries directly inside `dir`.
    fn watch(&mut self, dir: &Path) -> Result<()>;

    /// Next event, or `None` once the source is closed.
    fn next_event(&mut self) -> impl Future<Output = Option<FsEvent>> + Send;
}

/// [`FsWatch`] backed by the platform's native watcher.
pub struct NotifyWatch {
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<FsEvent>,
}

impl NotifyWatch {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let kind = match event.kind {
                        EventKind::Create(_) => FsEventKind::Create,
                        EventKind::Modify(ModifyKind::Metadata(_)) => return,
                        EventKind::Modify(_) => FsEventKind::Write,
                        _ => return,
                    };
                    for path in event.paths {
                        let _ = tx.send(FsEvent { path, kind });
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watcher error"),
            }
        })?;

        Ok(Self { watcher, rx })
    }
}

impl FsWatch for NotifyWatch {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %dir.display(), "Watching directory");
        Ok(())
    }

    fn next_event(&mut self) -> impl Future<Output = Option<FsEvent>> + Send {
        self.rx.recv()
    }
}

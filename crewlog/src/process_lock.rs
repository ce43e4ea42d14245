//! Process-level lock so only one crewlog-sync writes to a database.
//!
//! The lock is an advisory OS file lock (flock) held for the process lifetime,
//! scoped to the database path so syncs into different databases can coexist.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const SYNC_LOCK_FILE: &str = "crewlog-sync.lock";

/// Guard held by crewlog-sync. Released on drop.
pub struct SyncProcessGuard {
    _sync_lock: ProcessLock,
}

/// Acquire the sync lock for `db_path`, failing if another crewlog-sync holds it.
///
/// Relative and absolute spellings of the same database map to the same lock.
pub fn acquire_sync_guard(db_path: &Path) -> Result<SyncProcessGuard> {
    let path = lock_path(&runtime_dir(), db_path);
    let sync_lock = ProcessLock::try_acquire(path)?.with_context(|| {
        format!(
            "another crewlog-sync is already syncing into {}",
            db_path.display()
        )
    })?;

    Ok(SyncProcessGuard {
        _sync_lock: sync_lock,
    })
}

struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// `None` when another process holds the lock.
    fn try_acquire(path: PathBuf) -> Result<Option<Self>> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to create runtime lock directory: {}", dir.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open lock file: {}", path.display()))?;

        if let Err(e) = flock_nonblocking(&file) {
            if is_lock_busy(&e) {
                return Ok(None);
            }
            return Err(e).with_context(|| format!("failed to lock file: {}", path.display()));
        }

        // Owner pid, for debugging only
        let _ = file.set_len(0);
        let _ = file.seek(SeekFrom::Start(0));
        let _ = writeln!(file, "pid={}", std::process::id());
        let _ = file.flush();

        Ok(Some(Self { file, path }))
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = flock_release(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// `$XDG_RUNTIME_DIR/crewlog`, or the temp dir when unset
fn runtime_dir() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    base.join("crewlog")
}

/// Lock file for `db_path`, named by a hash of its absolute location.
fn lock_path(dir: &Path, db_path: &Path) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    absolute_db_path(db_path).hash(&mut hasher);
    dir.join(format!("{SYNC_LOCK_FILE}.{:016x}", hasher.finish()))
}

/// Absolute path of a database that may not exist yet.
///
/// The parent directory is canonicalized when it exists; otherwise the path is
/// joined onto the working directory as is.
fn absolute_db_path(db_path: &Path) -> PathBuf {
    let parent = match db_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let (Ok(dir), Some(name)) = (parent.canonicalize(), db_path.file_name()) {
        return dir.join(name);
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(db_path),
        Err(_) => db_path.to_path_buf(),
    }
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn flock_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn flock_release(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("crewlog process locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_guard_for_same_db_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("a.db");

        let first = acquire_sync_guard(&db).unwrap();
        assert!(acquire_sync_guard(&db).is_err());

        // A different database is independent
        let other = acquire_sync_guard(&dir.path().join("b.db")).unwrap();

        drop(first);
        assert!(acquire_sync_guard(&db).is_ok());
        drop(other);
    }

    #[test]
    fn test_dotted_db_path_shares_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let db = dir.path().join("a.db");

        let first = acquire_sync_guard(&db).unwrap();
        assert!(acquire_sync_guard(&dir.path().join(".").join("a.db")).is_err());
        assert!(acquire_sync_guard(&dir.path().join("sub/../a.db")).is_err());
        drop(first);

        assert_eq!(
            lock_path(Path::new("/run"), &dir.path().join("sub/../a.db")),
            lock_path(Path::new("/run"), &db)
        );
    }

    #[test]
    fn test_relative_db_path_is_made_absolute() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            absolute_db_path(Path::new("crewlog-test-missing.db")),
            cwd.canonicalize().unwrap().join("crewlog-test-missing.db")
        );
        assert!(absolute_db_path(Path::new("no/such/dir/x.db")).is_absolute());
    }
}

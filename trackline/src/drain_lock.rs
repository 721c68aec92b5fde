//! Cross-process drain lock.
//!
//! Only one `trackline` process may drain a given event database at a time;
//! two concurrent drains would post the same records twice. The lock is an
//! advisory OS file lock (flock) scoped to the database path and held until
//! the guard is dropped.
//!
//! The lock file is never unlinked, so every process locks the same inode.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const DRAIN_LOCK_FILE: &str = "trackline-drain.lock";

/// Held while this process drains the database.
pub struct DrainLock {
    file: File,
    path: PathBuf,
}

impl Drop for DrainLock {
    fn drop(&mut self) {
        if let Err(e) = unlock_file(&self.file) {
            tracing::debug!(
                lock = %self.path.display(),
                error = %e,
                "Failed to release drain lock"
            );
        }
    }
}

/// Acquire the drain lock for `db_path`, failing if another process holds it.
pub fn acquire(db_path: &Path) -> Result<DrainLock> {
    match try_acquire(db_path)? {
        Some(lock) => Ok(lock),
        None => anyhow::bail!(
            "another trackline process is already flushing {}",
            db_path.display()
        ),
    }
}

/// Acquire the drain lock if it is free.
pub fn try_acquire(db_path: &Path) -> Result<Option<DrainLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner pid, for debugging stale locks.
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            tracing::debug!(lock = %path.display(), "Acquired drain lock");
            Ok(Some(DrainLock { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("trackline");
    dir
}

fn scoped_lock_filename(db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    format!("{DRAIN_LOCK_FILE}.{:016x}", hasher.finish())
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
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
compile_error!("trackline drain locks currently require Unix (macOS/Linux)");

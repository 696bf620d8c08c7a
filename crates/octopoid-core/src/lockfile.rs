//! Non-blocking pid file locks.
//!
//! One lock serialises whole ticks (`scheduler.lock`), one per blueprint
//! serialises blueprint evaluation. Acquisition never blocks: a held lock
//! means the caller backs off until the next tick. A lock whose recorded pid
//! is dead is stale and is reclaimed in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::process::pid_alive;

/// A held file lock. Released on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Try to acquire the lock at `path` without blocking.
    ///
    /// Returns `Ok(None)` when another live process holds it. A stale lock
    /// (dead pid, or unreadable contents) is removed and acquisition retried
    /// once.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock directory {}", parent.display()))?;
        }

        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(file) => {
                    use std::io::Write;
                    let mut file = file;
                    write!(file, "{}", std::process::id())
                        .with_context(|| format!("failed to write pid to {}", path.display()))?;
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = std::fs::read_to_string(path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());

                    match holder {
                        Some(pid) if pid_alive(pid) => return Ok(None),
                        _ => {
                            // Stale or garbled: reclaim and retry.
                            tracing::warn!(
                                path = %path.display(),
                                "removing stale lock file"
                            );
                            let _ = std::fs::remove_file(path);
                        }
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to create lock at {}", path.display()));
                }
            }
        }

        Ok(None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("scheduler.lock");

        let lock = LockFile::try_acquire(&path).unwrap();
        assert!(lock.is_some());
        assert!(path.exists());

        drop(lock);
        assert!(!path.exists(), "lock file removed on drop");
    }

    #[test]
    fn second_acquire_backs_off() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("scheduler.lock");

        let _held = LockFile::try_acquire(&path).unwrap().unwrap();
        let second = LockFile::try_acquire(&path).unwrap();
        assert!(second.is_none(), "held lock must not be acquired twice");
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("scheduler.lock");

        // A pid that is certainly dead: a reaped child.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        std::fs::write(&path, dead_pid.to_string()).unwrap();

        let lock = LockFile::try_acquire(&path).unwrap();
        assert!(lock.is_some(), "stale lock should be reclaimed");
    }

    #[test]
    fn garbled_lock_is_reclaimed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("scheduler.lock");
        std::fs::write(&path, "not-a-pid").unwrap();

        let lock = LockFile::try_acquire(&path).unwrap();
        assert!(lock.is_some());
    }
}

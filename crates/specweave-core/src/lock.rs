//! Advisory lock over the monitor state file.
//!
//! The sentinel file is locked with an OS-level exclusive lock (`flock` on
//! Unix, `LockFileEx` on Windows). The kernel drops the lock when the holder
//! exits, so a crashed process can never leave a stale lock behind and no
//! acquirer ever needs to break someone else's lock.

use crate::error::{Result, SpecweaveError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Guard for a held state lock. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock at `path`, retrying every 50ms until `timeout`.
    ///
    /// The file is created if missing and, while held, contains the holder's
    /// PID for diagnostics.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let started = Instant::now();
        let contended = fs2::lock_contended_error().raw_os_error();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == contended => {
                    if started.elapsed() >= timeout {
                        tracing::warn!(
                            path = %path.display(),
                            holder = %read_holder(path).unwrap_or_default(),
                            "timed out waiting for state lock"
                        );
                        return Err(SpecweaveError::LockTimeout {
                            path: path.to_path_buf(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.write_pid()?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_pid(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        let mut f = &self.file;
        write!(f, "{}", std::process::id())?;
        f.flush()?;
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Empty the sentinel before unlocking; the file itself stays so every
        // process keeps locking the same inode.
        let _ = self.file.set_len(0);
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

/// PID recorded in the lock file, if any.
pub fn read_holder(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_records_pid_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/test.lock");
        let lock = StateLock::acquire(&path, LOCK_TIMEOUT).unwrap();
        assert_eq!(read_holder(lock.path()), Some(std::process::id().to_string()));
        drop(lock);
        assert_eq!(read_holder(&path), None);
    }

    #[test]
    fn second_acquirer_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lock");
        let _held = StateLock::acquire(&path, LOCK_TIMEOUT).unwrap();
        let started = Instant::now();
        let err = StateLock::acquire(&path, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, SpecweaveError::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn lock_is_reacquirable_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lock");
        drop(StateLock::acquire(&path, LOCK_TIMEOUT).unwrap());
        let again = StateLock::acquire(&path, Duration::from_millis(100));
        assert!(again.is_ok());
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lock");
        let held = StateLock::acquire(&path, LOCK_TIMEOUT).unwrap();
        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || StateLock::acquire(&waiter_path, LOCK_TIMEOUT).is_ok());
        std::thread::sleep(Duration::from_millis(150));
        drop(held);
        assert!(waiter.join().unwrap());
    }
}

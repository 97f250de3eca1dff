use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = ".patchiq.lock";

/// Exclusive lock on the run-logs directory, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting. A held lock means another run is
    /// using the same ledger.
    pub fn acquire(run_logs_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(run_logs_dir)?;
        let path = run_logs_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(lock = %path.display(), "acquired run lock");
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::RunInProgress(path)),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::RunInProgress(path))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = TempDir::new().unwrap();
        let first = RunLock::acquire(dir.path()).unwrap();
        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::RunInProgress(_)));
        assert_eq!(err.exit_code(), 9);
        drop(first);
        assert!(RunLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("run_logs");
        let lock = RunLock::acquire(&nested).unwrap();
        assert!(lock.path().exists());
    }
}

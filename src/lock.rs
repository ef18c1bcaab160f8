use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("another pipeline run holds the lock: {path}")]
pub struct AlreadyRunning {
    pub path: PathBuf,
}

/// Marker-file lock giving one pipeline invocation at a time exclusive
/// access to a data directory.
///
/// The file is created with `create_new`, so acquisition is atomic on the
/// filesystem. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock, failing fast if another run holds it.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyRunning`] (via `anyhow`) if the marker file exists,
    /// or an I/O error if it cannot be created.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create lock directory: {}", dir.display()))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // PID in the file is purely diagnostic.
                let _ = writeln!(file, "{}", std::process::id());
                debug!(path = %path.display(), "Acquired run lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AlreadyRunning { path }.into())
            }
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("Failed to create lock file: {}", path.display())),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "Failed to remove run lock: {e}");
        } else {
            debug!(path = %self.path.display(), "Released run lock");
        }
    }
}

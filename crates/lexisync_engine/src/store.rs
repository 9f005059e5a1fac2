//! Local store contract.

use crate::error::{BackupError, BackupResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::UNIX_EPOCH;
use tokio::fs::File;

/// The dictionary database as seen by the backup engine.
///
/// The engine only needs the backing file path and the ability to release
/// and re-acquire it around a restore.
///
/// # Implementors
///
/// - [`FileLocalStore`] - Single database file
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Path of the backing file.
    fn path(&self) -> &Path;

    /// Releases the backing file.
    async fn close(&self) -> BackupResult<()>;

    /// Re-acquires the backing file.
    async fn reopen(&self) -> BackupResult<()>;

    /// Version of the store contents.
    fn version(&self) -> i64;
}

/// A store backed by one file.
///
/// Keeps a handle on the file while open. The version is the file's
/// modification time in Unix seconds, refreshed on every (re)open.
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    handle: Mutex<Option<File>>,
    version: AtomicI64,
}

impl FileLocalStore {
    /// Opens the store at `path`. A missing file leaves the store closed.
    pub async fn open(path: impl Into<PathBuf>) -> BackupResult<Self> {
        let store = Self {
            path: path.into(),
            handle: Mutex::new(None),
            version: AtomicI64::new(0),
        };
        match store.reopen().await {
            Ok(()) | Err(BackupError::NotFound(_)) => Ok(store),
            Err(e) => Err(e),
        }
    }

    /// Returns true while the backing file is held.
    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn close(&self) -> BackupResult<()> {
        if self.handle.lock().take().is_some() {
            tracing::debug!(path = ?self.path, "local store closed");
        }
        Ok(())
    }

    async fn reopen(&self) -> BackupResult<()> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(format!(
                    "local store {}",
                    self.path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let modified = file.metadata().await?.modified()?;
        let version = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.version.store(version, Ordering::SeqCst);
        *self.handle.lock() = Some(file);
        tracing::debug!(path = ?self.path, version, "local store opened");
        Ok(())
    }

    fn version(&self) -> i64 {
        self.version.load(Ordering::SeqCst)
    }
}

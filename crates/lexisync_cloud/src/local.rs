//! Directory-backed cloud storage provider.

use crate::client::{ChunkedCopy, CloudStorageClient, ProgressFn, UploadRequest};
use crate::error::{CloudError, CloudResult};
use crate::metadata::{BackupMetadata, BACKUP_MIME_TYPE};
use crate::session::{require_session, SessionProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// A provider whose remote side is a directory.
///
/// Folders are subdirectories of the root and objects are regular files in
/// them. The object id is `<folder>/<name>`. Useful for NAS shares, USB
/// disks and any synced directory.
///
/// # Durability
///
/// Uploads are written to a hidden `.<name>.partial` file, synced, and then
/// renamed into place, so a listing never shows a half-written object.
///
/// # Example
///
/// ```no_run
/// use lexisync_cloud::{LocalFolderStorage, Session, StaticSessionProvider};
/// use std::sync::Arc;
///
/// let sessions = Arc::new(StaticSessionProvider::signed_in(Session::new("local", "-")));
/// let storage = LocalFolderStorage::new("/mnt/backups", sessions);
/// ```
pub struct LocalFolderStorage {
    root: PathBuf,
    sessions: Arc<dyn SessionProvider>,
    copy: ChunkedCopy,
}

impl LocalFolderStorage {
    /// Creates a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            root: root.into(),
            sessions,
            copy: ChunkedCopy::default(),
        }
    }

    /// Sets the transfer chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.copy = ChunkedCopy::new(chunk_size);
        self
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_id(&self, id: &str) -> CloudResult<PathBuf> {
        let (folder, name) = id
            .split_once('/')
            .ok_or_else(|| CloudError::NotFound(format!("file {id}")))?;
        check_component(folder)?;
        check_component(name)?;
        Ok(self.root.join(folder).join(name))
    }

    async fn metadata_for(&self, folder: &str, path: &Path) -> CloudResult<BackupMetadata> {
        let meta = fs::metadata(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CloudError::Protocol(format!("non UTF-8 file name {path:?}")))?;
        let created = meta.created().or_else(|_| meta.modified())?;

        Ok(BackupMetadata {
            id: format!("{folder}/{name}"),
            name: name.to_string(),
            created_time: DateTime::<Utc>::from(created),
            size_bytes: meta.len() as i64,
        })
    }
}

/// Rejects names that would escape the root or address a nested path.
fn check_component(name: &str) -> CloudResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(CloudError::Protocol(format!("invalid object name {name:?}")));
    }
    Ok(())
}

fn partial_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{name}.partial"))
}

#[async_trait]
impl CloudStorageClient for LocalFolderStorage {
    async fn get_or_create_folder(&self, name: &str) -> CloudResult<String> {
        require_session(self.sessions.as_ref()).await?;
        check_component(name)?;

        let dir = self.root.join(name);
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            tracing::info!(path = ?dir, "created backup folder");
        }
        Ok(name.to_string())
    }

    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: &str,
    ) -> CloudResult<Vec<BackupMetadata>> {
        require_session(self.sessions.as_ref()).await?;
        check_component(folder_id)?;

        // Every object in a local folder is an opaque backup blob.
        if mime_type != BACKUP_MIME_TYPE {
            return Ok(Vec::new());
        }

        let dir = self.root.join(folder_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CloudError::NotFound(format!("folder {folder_id}")))
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.file_type().await?.is_file() {
                continue;
            }
            files.push(self.metadata_for(folder_id, &entry.path()).await?);
        }
        Ok(files)
    }

    async fn upload(
        &self,
        request: UploadRequest<'_>,
        source: &mut (dyn AsyncRead + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<BackupMetadata> {
        require_session(self.sessions.as_ref()).await?;
        check_component(request.folder_id)?;
        check_component(request.name)?;

        let dir = self.root.join(request.folder_id);
        if !fs::try_exists(&dir).await? {
            return Err(CloudError::NotFound(format!("folder {}", request.folder_id)));
        }

        let partial = partial_path(&dir, request.name);
        let target = dir.join(request.name);
        let written = async {
            let mut file = fs::File::create(&partial).await?;
            self.copy
                .run(source, &mut file, request.length, progress, cancel)
                .await?;
            file.sync_all().await?;
            fs::rename(&partial, &target).await?;
            Ok::<_, CloudError>(())
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = ?partial, error = %cleanup, "failed to remove partial upload");
                }
            }
            return Err(e);
        }

        self.metadata_for(request.folder_id, &target).await
    }

    async fn download(
        &self,
        file_id: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<()> {
        require_session(self.sessions.as_ref()).await?;
        let path = self.resolve_id(file_id)?;

        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CloudError::NotFound(format!("file {file_id}")))
            }
            Err(e) => return Err(e.into()),
        };
        let length = file.metadata().await?.len();
        self.copy
            .run(&mut file, dest, length, progress, cancel)
            .await?;
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> CloudResult<()> {
        require_session(self.sessions.as_ref()).await?;
        let path = self.resolve_id(file_id)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

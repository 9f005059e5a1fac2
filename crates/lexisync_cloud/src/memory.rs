//! In-memory cloud storage provider for testing.

use crate::client::{ChunkedCopy, CloudStorageClient, ProgressFn, UploadRequest};
use crate::error::{CloudError, CloudResult, FaultKind};
use crate::metadata::BackupMetadata;
use crate::session::{require_session, Session, SessionProvider, StaticSessionProvider};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Provider operations, used for fault injection and attempt counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get_or_create_folder`
    Folder,
    /// `list_files`
    List,
    /// `upload`
    Upload,
    /// `download`
    Download,
    /// `delete`
    Delete,
}

#[derive(Debug, Clone)]
struct Folder {
    id: String,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredFile {
    meta: BackupMetadata,
    folder_id: String,
    mime_type: String,
    data: Vec<u8>,
}

/// A cloud provider that keeps folders and objects in memory.
///
/// This provider is suitable for:
/// - Unit and integration tests of the backup engine
/// - Exercising failure paths through injected faults
/// - Exercising cancellation through a per-chunk transfer pace
///
/// Objects only become visible once an upload has read its whole source, so a
/// cancelled or failed upload leaves nothing behind.
pub struct InMemoryCloudStorage {
    sessions: Arc<dyn SessionProvider>,
    folders: RwLock<Vec<Folder>>,
    files: RwLock<BTreeMap<String, StoredFile>>,
    faults: Mutex<HashMap<Operation, VecDeque<FaultKind>>>,
    attempts: Mutex<HashMap<Operation, u64>>,
    last_created: Mutex<Option<DateTime<Utc>>>,
    copy: ChunkedCopy,
}

impl InMemoryCloudStorage {
    /// Creates an empty store guarded by `sessions`.
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            sessions,
            folders: RwLock::new(Vec::new()),
            files: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            last_created: Mutex::new(None),
            copy: ChunkedCopy::new(16 * 1024),
        }
    }

    /// Creates an empty store with an always-signed-in session.
    pub fn signed_in() -> Self {
        Self::new(Arc::new(StaticSessionProvider::signed_in(Session::new(
            "tester@example.com",
            "memory-token",
        ))))
    }

    /// Sets the transfer chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.copy = ChunkedCopy {
            chunk_size: chunk_size.max(1),
            pace: self.copy.pace,
        };
        self
    }

    /// Pauses after every transferred chunk.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.copy = self.copy.with_pace(pace);
        self
    }

    /// Makes the next `count` calls of `operation` fail with `fault`.
    pub fn inject_failures(&self, operation: Operation, fault: FaultKind, count: usize) {
        let mut faults = self.faults.lock();
        let queue = faults.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(fault, count));
    }

    /// Number of times `operation` was attempted with a valid session.
    pub fn attempts(&self, operation: Operation) -> u64 {
        self.attempts.lock().get(&operation).copied().unwrap_or(0)
    }

    /// Adds an object directly, bypassing sessions and faults.
    pub fn seed_file(
        &self,
        folder_id: &str,
        name: &str,
        created_time: DateTime<Utc>,
        data: Vec<u8>,
    ) -> BackupMetadata {
        let meta = BackupMetadata {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_time,
            size_bytes: data.len() as i64,
        };
        self.files.write().insert(
            meta.id.clone(),
            StoredFile {
                meta: meta.clone(),
                folder_id: folder_id.to_string(),
                mime_type: crate::metadata::BACKUP_MIME_TYPE.to_string(),
                data,
            },
        );
        meta
    }

    /// Creates a folder directly, bypassing sessions and faults.
    pub fn seed_folder(&self, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.folders.write().push(Folder {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    /// Returns the content of object `id`.
    pub fn file_data(&self, id: &str) -> Option<Vec<u8>> {
        self.files.read().get(id).map(|f| f.data.clone())
    }

    /// Number of stored objects across all folders.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Number of folders called `name`.
    pub fn folder_count(&self, name: &str) -> usize {
        self.folders.read().iter().filter(|f| f.name == name).count()
    }

    async fn enter(&self, operation: Operation, context: &str) -> CloudResult<()> {
        require_session(self.sessions.as_ref()).await?;
        *self.attempts.lock().entry(operation).or_insert(0) += 1;

        let fault = self
            .faults
            .lock()
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front());
        match fault {
            Some(fault) => {
                tracing::debug!(?operation, ?fault, "injecting provider fault");
                Err(fault.into_error(context))
            }
            None => Ok(()),
        }
    }

    fn next_created_time(&self) -> DateTime<Utc> {
        let mut last = self.last_created.lock();
        let mut now = Utc::now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + ChronoDuration::milliseconds(1);
            }
        }
        *last = Some(now);
        now
    }

    fn folder_exists(&self, folder_id: &str) -> bool {
        self.folders.read().iter().any(|f| f.id == folder_id)
    }
}

#[async_trait]
impl CloudStorageClient for InMemoryCloudStorage {
    async fn get_or_create_folder(&self, name: &str) -> CloudResult<String> {
        self.enter(Operation::Folder, name).await?;

        if let Some(folder) = self.folders.read().iter().find(|f| f.name == name) {
            return Ok(folder.id.clone());
        }

        let id = self.seed_folder(name);
        tracing::debug!(folder = name, %id, "created folder");
        Ok(id)
    }

    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: &str,
    ) -> CloudResult<Vec<BackupMetadata>> {
        self.enter(Operation::List, folder_id).await?;

        if !self.folder_exists(folder_id) {
            return Err(CloudError::NotFound(format!("folder {folder_id}")));
        }

        Ok(self
            .files
            .read()
            .values()
            .filter(|f| f.folder_id == folder_id && f.mime_type == mime_type)
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn upload(
        &self,
        request: UploadRequest<'_>,
        source: &mut (dyn AsyncRead + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<BackupMetadata> {
        self.enter(Operation::Upload, request.name).await?;

        if !self.folder_exists(request.folder_id) {
            return Err(CloudError::NotFound(format!("folder {}", request.folder_id)));
        }

        let mut data = Vec::with_capacity(request.length as usize);
        let copied = self
            .copy
            .run(source, &mut data, request.length, progress, cancel)
            .await?;
        if copied != request.length {
            tracing::warn!(
                expected = request.length,
                copied,
                "upload source length differs from declared length"
            );
        }

        let meta = BackupMetadata {
            id: Uuid::new_v4().to_string(),
            name: request.name.to_string(),
            created_time: self.next_created_time(),
            size_bytes: data.len() as i64,
        };
        self.files.write().insert(
            meta.id.clone(),
            StoredFile {
                meta: meta.clone(),
                folder_id: request.folder_id.to_string(),
                mime_type: request.mime_type.to_string(),
                data,
            },
        );
        Ok(meta)
    }

    async fn download(
        &self,
        file_id: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<()> {
        self.enter(Operation::Download, file_id).await?;

        let data = self
            .file_data(file_id)
            .ok_or_else(|| CloudError::NotFound(format!("file {file_id}")))?;
        let mut reader = &data[..];
        self.copy
            .run(&mut reader, dest, data.len() as u64, progress, cancel)
            .await?;
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> CloudResult<()> {
        self.enter(Operation::Delete, file_id).await?;

        if self.files.write().remove(file_id).is_none() {
            tracing::debug!(file_id, "delete of unknown file treated as success");
        }
        Ok(())
    }
}

//! Cloud storage client trait definition.

use crate::error::{CloudError, CloudResult};
use crate::metadata::BackupMetadata;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Progress callback: `(percent, bytes_so_far)`.
///
/// The lifetime lets callers pass closures that borrow local state.
pub type ProgressFn<'a> = dyn Fn(u8, u64) + Send + Sync + 'a;

/// Parameters of a single upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    /// Folder the object is created in.
    pub folder_id: &'a str,
    /// Object name.
    pub name: &'a str,
    /// Object MIME type.
    pub mime_type: &'a str,
    /// Number of bytes the source will yield.
    pub length: u64,
}

/// A remote object store holding backup snapshots.
///
/// Implementations are thin wrappers around one provider. They keep no
/// state between calls beyond the provider connection, and every call
/// checks for a valid session first.
///
/// # Invariants
///
/// - Every operation fails with [`CloudError::Auth`] if there is no session
/// - `list_files` returns an empty list, never an error, for an empty folder
/// - Progress callbacks report non-decreasing byte counts
/// - `delete` of an unknown id succeeds
/// - A cancelled transfer returns [`CloudError::Cancelled`] promptly
///
/// # Implementors
///
/// - [`crate::InMemoryCloudStorage`] - For testing
/// - [`crate::LocalFolderStorage`] - Directory on a local or mounted disk
/// - [`crate::DriveClient`] - Google Drive v3
#[async_trait]
pub trait CloudStorageClient: Send + Sync {
    /// Returns the id of the folder named `name`, creating it if absent.
    ///
    /// Two concurrent callers may both create the folder; callers serialize.
    async fn get_or_create_folder(&self, name: &str) -> CloudResult<String>;

    /// Lists the immediate children of `folder_id` whose MIME type is `mime_type`.
    async fn list_files(&self, folder_id: &str, mime_type: &str)
        -> CloudResult<Vec<BackupMetadata>>;

    /// Streams `source` into a new object and returns its metadata.
    async fn upload(
        &self,
        request: UploadRequest<'_>,
        source: &mut (dyn AsyncRead + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<BackupMetadata>;

    /// Streams the object `file_id` into `dest`.
    ///
    /// The caller owns `dest` and decides what to do with partial output.
    async fn download(
        &self,
        file_id: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<()>;

    /// Deletes the object `file_id`. Unknown ids are not an error.
    async fn delete(&self, file_id: &str) -> CloudResult<()>;
}

/// Converts a byte count into a percentage of `total`, clamped to 100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = u128::from(done) * 100 / u128::from(total);
    percent.min(100) as u8
}

/// Chunked stream copy that reports progress and honours cancellation.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedCopy {
    /// Bytes read per step.
    pub chunk_size: usize,
    /// Optional pause after each chunk (throttled links, tests).
    pub pace: Option<Duration>,
}

impl Default for ChunkedCopy {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            pace: None,
        }
    }
}

impl ChunkedCopy {
    /// Creates a copier with the given chunk size.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pace: None,
        }
    }

    /// Sets the pause after each chunk.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Copies `reader` into `writer`, returning the number of bytes copied.
    ///
    /// `total` is only used for the percentage passed to `progress`.
    pub async fn run<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        total: u64,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size.max(1)];
        let mut done = 0u64;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CloudError::Cancelled),
                read = reader.read(&mut buf) => read?,
            };
            if read == 0 {
                break;
            }

            writer.write_all(&buf[..read]).await?;
            done += read as u64;
            progress(percent_of(done, total.max(done)), done);

            if let Some(pace) = self.pace {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CloudError::Cancelled),
                    _ = tokio::time::sleep(pace) => {}
                }
            }
        }

        writer.flush().await?;
        Ok(done)
    }
}

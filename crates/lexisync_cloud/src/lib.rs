//! # LexiSync Cloud
//!
//! Remote storage for LexiSync dictionary backups.
//!
//! This crate provides:
//! - The [`CloudStorageClient`] trait every provider implements
//! - Backup object metadata and latest-entry selection
//! - The session contract providers authenticate against
//! - Providers: in-memory, local directory, and Google Drive v3
//!
//! ## Key Invariants
//!
//! - Every provider call requires a valid session
//! - Listing an empty folder is not an error
//! - Deleting an unknown object is not an error
//! - Transfers report non-decreasing progress and stop promptly on cancel

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod drive;
mod error;
mod local;
mod memory;
mod metadata;
mod session;

pub use client::{percent_of, ChunkedCopy, CloudStorageClient, ProgressFn, UploadRequest};
pub use drive::{DriveClient, DriveConfig, UPLOAD_CHUNK_ALIGN};
pub use error::{CloudError, CloudResult, FaultKind};
pub use local::LocalFolderStorage;
pub use memory::{InMemoryCloudStorage, Operation};
pub use metadata::{select_latest, BackupMetadata, BACKUP_MIME_TYPE, FOLDER_MIME_TYPE};
pub use session::{require_session, Session, SessionProvider, StaticSessionProvider};

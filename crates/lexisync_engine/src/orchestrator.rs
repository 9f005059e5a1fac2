//! Backup and restore algorithms.

use crate::config::OrchestratorConfig;
use crate::error::{BackupError, BackupResult};
use crate::settings::SettingsStore;
use crate::state::{TransferKind, TransferStateMachine};
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use lexisync_cloud::{
    require_session, select_latest, BackupMetadata, CloudStorageClient, SessionProvider,
    UploadRequest,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Builds the remote name of a backup taken at `at`.
///
/// The layout is `<base>_<yyyy-MM-dd_HH-mm-ss>.<ext>`, in UTC.
pub fn backup_file_name(base: &str, extension: Option<&str>, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%d_%H-%M-%S");
    match extension {
        Some(ext) if !ext.is_empty() => format!("{base}_{stamp}.{ext}"),
        _ => format!("{base}_{stamp}"),
    }
}

/// Moves local store snapshots to and from remote storage.
///
/// Only one backup or restore runs at a time; a second call while one is in
/// progress fails with [`BackupError::TransferInProgress`]. Progress and
/// outcome are published through the [`TransferStateMachine`].
///
/// # Retention
///
/// A successful backup deletes every other object in the backup folder, so
/// at most one backup exists remotely whenever no transfer is running.
pub struct BackupOrchestrator {
    cloud: Arc<dyn CloudStorageClient>,
    sessions: Arc<dyn SessionProvider>,
    store: Arc<dyn LocalStore>,
    transfer: Arc<TransferStateMachine>,
    settings: Option<Arc<dyn SettingsStore>>,
    config: OrchestratorConfig,
    folder_lock: Mutex<()>,
}

impl BackupOrchestrator {
    /// Creates an orchestrator with default configuration.
    pub fn new(
        cloud: Arc<dyn CloudStorageClient>,
        sessions: Arc<dyn SessionProvider>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            cloud,
            sessions,
            store,
            transfer: Arc::new(TransferStateMachine::new()),
            settings: None,
            config: OrchestratorConfig::default(),
            folder_lock: Mutex::new(()),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Records successful backups in `settings`.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Uses a shared transfer state machine.
    pub fn with_transfer(mut self, transfer: Arc<TransferStateMachine>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Returns the transfer state machine for observers.
    pub fn transfer(&self) -> &Arc<TransferStateMachine> {
        &self.transfer
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Cancels the running transfer, if any.
    pub fn cancel(&self) -> bool {
        self.transfer.cancel()
    }

    /// Uploads the local store and prunes every older backup.
    pub async fn backup(&self) -> BackupResult<BackupMetadata> {
        require_session(self.sessions.as_ref()).await?;
        let cancel = self.begin(TransferKind::Backup)?;

        match self.run_backup(&cancel).await {
            // A cancel that landed after the upload already moved the state
            // to `Error`; the stray object goes with the next retention pass.
            Ok(meta) if !self.transfer.complete() => {
                tracing::info!(id = %meta.id, "backup cancelled after upload");
                Err(BackupError::Cancelled)
            }
            Ok(meta) => {
                tracing::info!(id = %meta.id, name = %meta.name, bytes = meta.size_bytes, "backup complete");
                self.record_backup(&meta).await;
                Ok(meta)
            }
            Err(e) => {
                self.transfer.fail(&e);
                tracing::warn!(error = %e, "backup failed");
                Err(e)
            }
        }
    }

    /// Replaces the local store with a backup.
    ///
    /// Without `backup_id` the newest backup is used. On success the store is
    /// left closed and the caller reopens it; on failure the store is
    /// reopened. The returned result always agrees with the published
    /// [`crate::TransferState`].
    pub async fn restore(&self, backup_id: Option<&str>) -> BackupResult<()> {
        require_session(self.sessions.as_ref()).await?;
        let cancel = self.begin(TransferKind::Restore)?;

        match self.run_restore(backup_id, &cancel).await {
            Ok(id) if !self.transfer.complete() => {
                // Cancelled after the rename: the store already holds the
                // backup, reopen it like any other failed restore.
                tracing::info!(id = %id, "restore cancelled after replacing the store");
                if let Err(reopen) = self.store.reopen().await {
                    tracing::warn!(error = %reopen, "failed to reopen local store after cancelled restore");
                }
                Err(BackupError::Cancelled)
            }
            Ok(id) => {
                tracing::info!(id = %id, "restore complete");
                Ok(())
            }
            Err(e) => {
                self.transfer.fail(&e);
                tracing::warn!(error = %e, "restore failed");
                Err(e)
            }
        }
    }

    /// Lists the backups in the backup folder.
    pub async fn list_backups(&self) -> BackupResult<Vec<BackupMetadata>> {
        let folder_id = self.folder_id().await?;
        Ok(self
            .cloud
            .list_files(&folder_id, &self.config.mime_type)
            .await?)
    }

    /// Returns the newest backup, if any.
    pub async fn latest_backup(&self) -> BackupResult<Option<BackupMetadata>> {
        let entries = self.list_backups().await?;
        Ok(select_latest(&entries).cloned())
    }

    /// Resets a finished operation and starts a new one.
    fn begin(&self, kind: TransferKind) -> BackupResult<CancellationToken> {
        if self.transfer.state().is_terminal() {
            // Refused only if another operation started meanwhile; `start`
            // reports that case.
            let _ = self.transfer.reset();
        }
        self.transfer.start(kind)
    }

    async fn folder_id(&self) -> BackupResult<String> {
        let _guard = self.folder_lock.lock().await;
        Ok(self
            .cloud
            .get_or_create_folder(&self.config.folder_name)
            .await?)
    }

    fn report(&self, percent: u8, bytes: u64) {
        self.transfer.report_progress(percent, bytes);
    }

    async fn run_backup(&self, cancel: &CancellationToken) -> BackupResult<BackupMetadata> {
        let folder_id = self.folder_id().await?;

        let path = self.store.path();
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(format!(
                    "local store {}",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let length = file.metadata().await?.len();

        let base = match &self.config.base_name {
            Some(base) => base.clone(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "backup".into()),
        };
        let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
        let name = backup_file_name(&base, extension.as_deref(), Utc::now());

        tracing::debug!(name = %name, bytes = length, "uploading backup");
        let progress = |percent: u8, bytes: u64| self.report(percent, bytes);
        let meta = self
            .cloud
            .upload(
                UploadRequest {
                    folder_id: &folder_id,
                    name: &name,
                    mime_type: &self.config.mime_type,
                    length,
                },
                &mut file,
                &progress,
                cancel,
            )
            .await?;

        self.prune(&folder_id, &meta.id).await;
        Ok(meta)
    }

    /// Deletes every backup except `keep_id`. Failures are logged.
    async fn prune(&self, folder_id: &str, keep_id: &str) {
        let entries = match self
            .cloud
            .list_files(folder_id, &self.config.mime_type)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "could not list old backups for cleanup");
                return;
            }
        };

        for old in entries.iter().filter(|m| m.id != keep_id) {
            match self.cloud.delete(&old.id).await {
                Ok(()) => tracing::debug!(id = %old.id, name = %old.name, "deleted old backup"),
                Err(e) => tracing::warn!(id = %old.id, error = %e, "failed to delete old backup"),
            }
        }
    }

    async fn run_restore(
        &self,
        backup_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> BackupResult<String> {
        let target = match backup_id {
            Some(id) => id.to_string(),
            None => {
                let folder_id = self.folder_id().await?;
                let entries = self
                    .cloud
                    .list_files(&folder_id, &self.config.mime_type)
                    .await?;
                select_latest(&entries)
                    .map(|m| m.id.clone())
                    .ok_or_else(|| BackupError::NotFound("no backups available".into()))?
            }
        };

        self.store.close().await?;
        match self.download_over_store(&target, cancel).await {
            Ok(()) => Ok(target),
            Err(e) => {
                if let Err(reopen) = self.store.reopen().await {
                    tracing::warn!(error = %reopen, "failed to reopen local store after failed restore");
                }
                Err(e)
            }
        }
    }

    /// Downloads into a temporary sibling and renames it over the store file.
    async fn download_over_store(&self, id: &str, cancel: &CancellationToken) -> BackupResult<()> {
        let target: PathBuf = self.store.path().to_path_buf();
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // Dropping `tmp` on any error path removes the partial download.
        let tmp = tempfile::Builder::new()
            .prefix(".restore-")
            .suffix(".partial")
            .tempfile_in(&dir)?;
        let mut dest = tokio::fs::File::from_std(tmp.reopen()?);

        let progress = |percent: u8, bytes: u64| self.report(percent, bytes);
        self.cloud.download(id, &mut dest, &progress, cancel).await?;
        dest.sync_all().await?;
        drop(dest);

        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        persist(tmp, &target)?;
        tracing::debug!(path = ?target, "local store replaced");
        Ok(())
    }

    async fn record_backup(&self, meta: &BackupMetadata) {
        let Some(settings) = &self.settings else {
            return;
        };
        let created = meta.created_time;
        let version = self.store.version();
        let update = settings
            .update(Box::new(move |s| {
                s.last_backup_at = Some(created);
                s.last_backup_version = version;
            }))
            .await;
        if let Err(e) = update {
            tracing::warn!(error = %e, "failed to record last backup");
        }
    }
}

fn persist(tmp: tempfile::NamedTempFile, target: &Path) -> BackupResult<()> {
    tmp.persist(target).map_err(|e| BackupError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;
    use crate::state::TransferState;
    use crate::store::FileLocalStore;
    use crate::ErrorKind;
    use chrono::TimeZone;
    use async_trait::async_trait;
    use lexisync_cloud::{
        CloudResult, FaultKind, InMemoryCloudStorage, Operation, ProgressFn, Session,
        StaticSessionProvider,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::sync::Notify;

    /// Delegates to an in-memory store but stalls in `delete`.
    struct SlowDelete {
        inner: Arc<InMemoryCloudStorage>,
        entered: Notify,
    }

    #[async_trait]
    impl CloudStorageClient for SlowDelete {
        async fn get_or_create_folder(&self, name: &str) -> CloudResult<String> {
            self.inner.get_or_create_folder(name).await
        }

        async fn list_files(
            &self,
            folder_id: &str,
            mime_type: &str,
        ) -> CloudResult<Vec<BackupMetadata>> {
            self.inner.list_files(folder_id, mime_type).await
        }

        async fn upload(
            &self,
            request: UploadRequest<'_>,
            source: &mut (dyn AsyncRead + Send + Unpin),
            progress: &ProgressFn<'_>,
            cancel: &CancellationToken,
        ) -> CloudResult<BackupMetadata> {
            self.inner.upload(request, source, progress, cancel).await
        }

        async fn download(
            &self,
            file_id: &str,
            dest: &mut (dyn AsyncWrite + Send + Unpin),
            progress: &ProgressFn<'_>,
            cancel: &CancellationToken,
        ) -> CloudResult<()> {
            self.inner.download(file_id, dest, progress, cancel).await
        }

        async fn delete(&self, file_id: &str) -> CloudResult<()> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.inner.delete(file_id).await
        }
    }

    struct Fixture {
        dir: TempDir,
        cloud: Arc<InMemoryCloudStorage>,
        store: Arc<FileLocalStore>,
        orchestrator: BackupOrchestrator,
    }

    async fn fixture_with(cloud: InMemoryCloudStorage, sessions: Arc<StaticSessionProvider>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dictionary.db");
        std::fs::write(&path, b"local dictionary").unwrap();

        let cloud = Arc::new(cloud);
        let store = Arc::new(FileLocalStore::open(&path).await.unwrap());
        let orchestrator = BackupOrchestrator::new(cloud.clone(), sessions, store.clone());
        Fixture {
            dir,
            cloud,
            store,
            orchestrator,
        }
    }

    async fn fixture() -> Fixture {
        let sessions = Arc::new(StaticSessionProvider::signed_in(Session::new("me", "t")));
        fixture_with(InMemoryCloudStorage::new(sessions.clone()), sessions).await
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn store_bytes(fx: &Fixture) -> Vec<u8> {
        std::fs::read(fx.dir.path().join("dictionary.db")).unwrap()
    }

    #[test]
    fn file_name_layout() {
        let when = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            backup_file_name("dictionary", Some("db"), when),
            "dictionary_2024-03-09_07-05-01.db"
        );
        assert_eq!(
            backup_file_name("dictionary", None, when),
            "dictionary_2024-03-09_07-05-01"
        );
    }

    #[tokio::test]
    async fn backup_requires_session() {
        let sessions = Arc::new(StaticSessionProvider::signed_out());
        let fx = fixture_with(InMemoryCloudStorage::new(sessions.clone()), sessions).await;

        let result = fx.orchestrator.backup().await;
        assert!(matches!(result, Err(BackupError::Auth(_))));
        assert_eq!(fx.orchestrator.transfer().state(), TransferState::Idle);
    }

    #[tokio::test]
    async fn backup_keeps_only_the_new_object() {
        let fx = fixture().await;
        let folder = fx.cloud.seed_folder("Backups");
        fx.cloud.seed_file(&folder, "old_1.db", at(1_000), b"one".to_vec());
        fx.cloud.seed_file(&folder, "old_2.db", at(2_000), b"two".to_vec());

        let meta = fx.orchestrator.backup().await.unwrap();
        assert!(meta.name.starts_with("dictionary_"));
        assert!(meta.name.ends_with(".db"));

        let remaining = fx.orchestrator.list_backups().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, meta.id);
        assert_eq!(fx.cloud.file_data(&meta.id).unwrap(), b"local dictionary");
        assert_eq!(
            fx.orchestrator.transfer().state(),
            TransferState::Success {
                kind: TransferKind::Backup
            }
        );
    }

    #[tokio::test]
    async fn backup_survives_failed_cleanup() {
        let fx = fixture().await;
        let folder = fx.cloud.seed_folder("Backups");
        fx.cloud.seed_file(&folder, "old.db", at(1_000), b"old".to_vec());
        fx.cloud
            .inject_failures(Operation::Delete, FaultKind::Network, 1);

        let meta = fx.orchestrator.backup().await.unwrap();
        assert_eq!(fx.cloud.file_count(), 2);

        // The next successful backup removes the stray object.
        fx.orchestrator.backup().await.unwrap();
        let remaining = fx.orchestrator.list_backups().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, meta.id);
    }

    #[tokio::test]
    async fn backup_of_missing_store_is_not_found() {
        let fx = fixture().await;
        std::fs::remove_file(fx.dir.path().join("dictionary.db")).unwrap();

        let result = fx.orchestrator.backup().await;
        assert!(matches!(result, Err(BackupError::NotFound(_))));
        match fx.orchestrator.transfer().state() {
            TransferState::Error { cause, .. } => assert_eq!(cause, ErrorKind::NotFound),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(fx.cloud.file_count(), 0);
    }

    #[tokio::test]
    async fn backup_records_settings() {
        let settings = Arc::new(MemorySettingsStore::default());
        let mut fx = fixture().await;
        fx.orchestrator = BackupOrchestrator::new(
            fx.cloud.clone(),
            Arc::new(StaticSessionProvider::signed_in(Session::new("me", "t"))),
            fx.store.clone(),
        )
        .with_settings(settings.clone());

        let meta = fx.orchestrator.backup().await.unwrap();
        let recorded = settings.get();
        assert_eq!(recorded.last_backup_at, Some(meta.created_time));
        assert_eq!(recorded.last_backup_version, fx.store.version());
    }

    #[tokio::test]
    async fn failed_backup_leaves_settings_untouched() {
        let settings = Arc::new(MemorySettingsStore::default());
        let sessions = Arc::new(StaticSessionProvider::signed_in(Session::new("me", "t")));
        let mut fx = fixture_with(InMemoryCloudStorage::new(sessions.clone()), sessions.clone()).await;
        fx.orchestrator = BackupOrchestrator::new(fx.cloud.clone(), sessions, fx.store.clone())
            .with_settings(settings.clone());
        fx.cloud
            .inject_failures(Operation::Upload, FaultKind::Quota, 1);

        assert!(matches!(
            fx.orchestrator.backup().await,
            Err(BackupError::Quota(_))
        ));
        assert!(settings.get().last_backup_at.is_none());
    }

    #[tokio::test]
    async fn restore_picks_newest_backup() {
        let fx = fixture().await;
        let folder = fx.cloud.seed_folder("Backups");
        fx.cloud.seed_file(&folder, "a.db", at(1_000), b"older".to_vec());
        fx.cloud.seed_file(&folder, "b.db", at(3_000), b"newest".to_vec());
        fx.cloud.seed_file(&folder, "c.db", at(2_000), b"middle".to_vec());

        fx.orchestrator.restore(None).await.unwrap();
        assert_eq!(store_bytes(&fx), b"newest");
        assert!(!fx.store.is_open());
        assert_eq!(
            fx.orchestrator.transfer().state(),
            TransferState::Success {
                kind: TransferKind::Restore
            }
        );
    }

    #[tokio::test]
    async fn restore_by_id() {
        let fx = fixture().await;
        let folder = fx.cloud.seed_folder("Backups");
        let older = fx.cloud.seed_file(&folder, "a.db", at(1_000), b"older".to_vec());
        fx.cloud.seed_file(&folder, "b.db", at(3_000), b"newest".to_vec());

        fx.orchestrator.restore(Some(&older.id)).await.unwrap();
        assert_eq!(store_bytes(&fx), b"older");
    }

    #[tokio::test]
    async fn restore_from_empty_folder_is_not_found() {
        let fx = fixture().await;

        let result = fx.orchestrator.restore(None).await;
        assert!(matches!(result, Err(BackupError::NotFound(_))));
        assert_eq!(store_bytes(&fx), b"local dictionary");
        assert!(fx.store.is_open());
    }

    #[tokio::test]
    async fn failed_download_keeps_store_and_cleans_up() {
        let fx = fixture().await;
        let folder = fx.cloud.seed_folder("Backups");
        fx.cloud.seed_file(&folder, "a.db", at(1_000), b"remote".to_vec());
        fx.cloud
            .inject_failures(Operation::Download, FaultKind::Network, 1);

        let result = fx.orchestrator.restore(None).await;
        assert!(matches!(result, Err(BackupError::Network(_))));
        assert_eq!(store_bytes(&fx), b"local dictionary");
        assert!(fx.store.is_open());

        let leftovers: Vec<_> = std::fs::read_dir(fx.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn operations_are_serialized_and_cancellable() {
        let sessions = Arc::new(StaticSessionProvider::signed_in(Session::new("me", "t")));
        let cloud = InMemoryCloudStorage::new(sessions.clone())
            .with_chunk_size(2)
            .with_pace(Duration::from_millis(20));
        let fx = Arc::new(fixture_with(cloud, sessions).await);

        let mut states = fx.orchestrator.transfer().subscribe();
        let running = {
            let fx = fx.clone();
            tokio::spawn(async move { fx.orchestrator.backup().await })
        };
        states
            .wait_for(|s| s.is_in_progress())
            .await
            .unwrap();

        assert!(matches!(
            fx.orchestrator.restore(None).await,
            Err(BackupError::TransferInProgress)
        ));

        assert!(fx.orchestrator.cancel());
        let result = running.await.unwrap();
        assert!(matches!(result, Err(BackupError::Cancelled)));
        assert_eq!(fx.cloud.file_count(), 0);
        match fx.orchestrator.transfer().state() {
            TransferState::Error { cause, .. } => assert_eq!(cause, ErrorKind::Cancelled),
            other => panic!("unexpected state {other:?}"),
        }

        // A finished operation does not block the next one.
        assert!(fx.orchestrator.backup().await.is_ok());
    }

    #[tokio::test]
    async fn cancel_during_cleanup_reports_cancelled() {
        let fx = fixture().await;
        let folder = fx.cloud.seed_folder("Backups");
        fx.cloud.seed_file(&folder, "old.db", at(1_000), b"old".to_vec());

        let slow = Arc::new(SlowDelete {
            inner: fx.cloud.clone(),
            entered: Notify::new(),
        });
        let settings = Arc::new(MemorySettingsStore::default());
        let orchestrator = Arc::new(
            BackupOrchestrator::new(
                slow.clone(),
                Arc::new(StaticSessionProvider::signed_in(Session::new("me", "t"))),
                fx.store.clone(),
            )
            .with_settings(settings.clone()),
        );

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.backup().await })
        };
        slow.entered.notified().await;
        assert!(orchestrator.cancel());

        let result = running.await.unwrap();
        assert!(matches!(result, Err(BackupError::Cancelled)));
        match orchestrator.transfer().state() {
            TransferState::Error { cause, .. } => assert_eq!(cause, ErrorKind::Cancelled),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(settings.get().last_backup_at.is_none());
        assert_eq!(settings.get().last_backup_version, 0);
    }
}

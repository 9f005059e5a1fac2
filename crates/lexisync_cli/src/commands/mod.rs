//! CLI command implementations.

pub mod backup;
pub mod list;
pub mod restore;
pub mod run;
pub mod settings;

use lexisync_cloud::{
    CloudStorageClient, DriveClient, DriveConfig, LocalFolderStorage, Session,
    StaticSessionProvider,
};
use lexisync_engine::{
    BackupOrchestrator, FileLocalStore, FileSettingsStore, OrchestratorConfig, TransferState,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Where backups are kept.
pub struct Remote {
    /// Local or mounted directory.
    pub dir: Option<PathBuf>,
    /// Google Drive access token.
    pub drive_token: Option<String>,
    /// Remote folder name.
    pub folder: String,
}

/// Collaborators shared by the commands.
pub struct Context {
    pub orchestrator: Arc<BackupOrchestrator>,
    pub store: Arc<FileLocalStore>,
    pub settings: Arc<FileSettingsStore>,
}

impl Context {
    /// Opens the store and settings and connects to the remote.
    pub async fn open(
        store_path: &Path,
        settings_path: &Path,
        remote: &Remote,
    ) -> Result<Self, Box<dyn Error>> {
        let cloud: Arc<dyn CloudStorageClient>;
        let sessions;
        if let Some(token) = &remote.drive_token {
            sessions = Arc::new(StaticSessionProvider::signed_in(Session::new("drive", token)));
            cloud = Arc::new(DriveClient::new(DriveConfig::default(), sessions.clone())?);
        } else if let Some(dir) = &remote.dir {
            sessions = Arc::new(StaticSessionProvider::signed_in(Session::new("local", "local")));
            cloud = Arc::new(LocalFolderStorage::new(dir, sessions.clone()));
        } else {
            return Err("Either --remote or --drive-token is required".into());
        }

        let store = Arc::new(FileLocalStore::open(store_path).await?);
        let settings = Arc::new(FileSettingsStore::open(settings_path).await?);
        let orchestrator = BackupOrchestrator::new(cloud, sessions, store.clone())
            .with_config(OrchestratorConfig::default().with_folder_name(remote.folder.as_str()))
            .with_settings(settings.clone());

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            store,
            settings,
        })
    }

    /// Cancels the running transfer when Ctrl-C is pressed.
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && orchestrator.cancel() {
                eprintln!("Cancelling...");
            }
        })
    }

    /// Logs transfer progress in 10% steps.
    pub fn log_progress(&self) -> JoinHandle<()> {
        let mut states = self.orchestrator.transfer().subscribe();
        tokio::spawn(async move {
            let mut last_step = None;
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                if let TransferState::InProgress {
                    kind,
                    progress_percent,
                    bytes_transferred,
                } = state
                {
                    let step = progress_percent / 10;
                    if last_step != Some(step) {
                        last_step = Some(step);
                        tracing::info!(?kind, percent = progress_percent, bytes = bytes_transferred, "transferring");
                    }
                }
            }
        })
    }
}

/// Formats a byte count for humans.
pub fn format_size(bytes: i64) -> String {
    let bytes = bytes.max(0) as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.1} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.1} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

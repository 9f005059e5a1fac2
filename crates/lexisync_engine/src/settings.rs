//! Persisted backup settings and their live stream.

use crate::error::{BackupError, BackupResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Default reminder interval in minutes.
pub const DEFAULT_REMINDER_MINUTES: u32 = 60;
/// Shortest reminder interval in minutes.
pub const MIN_REMINDER_MINUTES: u32 = 15;
/// Longest reminder interval in minutes.
pub const MAX_REMINDER_MINUTES: u32 = 180;

/// How often a backup runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomaticBackupFrequency {
    /// No automatic backups.
    #[default]
    Off,
    /// Every 24 hours.
    Daily,
    /// Every 7 days.
    Weekly,
    /// Every 30 days.
    Monthly,
}

impl fmt::Display for AutomaticBackupFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

impl FromStr for AutomaticBackupFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!(
                "unknown frequency '{other}' (expected off, daily, weekly or monthly)"
            )),
        }
    }
}

/// User-facing backup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSettings {
    /// Automatic backup cadence.
    pub automatic_backup_frequency: AutomaticBackupFrequency,
    /// Minutes between reminders. Clamped to 15..=180 when scheduled.
    pub reminder_interval_minutes: u32,
    /// Whether reminders fire at all.
    pub reminder_enabled: bool,
    /// Whether automatic backups may run over metered networks.
    pub use_mobile_data: bool,
    /// Creation time of the last successful backup.
    pub last_backup_at: Option<DateTime<Utc>>,
    /// Local store version captured by the last successful backup.
    pub last_backup_version: i64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            automatic_backup_frequency: AutomaticBackupFrequency::Off,
            reminder_interval_minutes: DEFAULT_REMINDER_MINUTES,
            reminder_enabled: false,
            use_mobile_data: false,
            last_backup_at: None,
            last_backup_version: 0,
        }
    }
}

/// A change applied to the settings record.
pub type SettingsUpdate = Box<dyn FnOnce(&mut BackupSettings) + Send>;

/// Persistent store for [`BackupSettings`].
///
/// Every successful `update` or `reset` that changes the record is published
/// to all subscribers.
///
/// # Implementors
///
/// - [`MemorySettingsStore`] - For testing
/// - [`FileSettingsStore`] - JSON file
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the current settings.
    fn get(&self) -> BackupSettings;

    /// Returns a live stream of the settings.
    fn subscribe(&self) -> watch::Receiver<BackupSettings>;

    /// Applies `change` and returns the new settings.
    async fn update(&self, change: SettingsUpdate) -> BackupResult<BackupSettings>;

    /// Restores the defaults.
    async fn reset(&self) -> BackupResult<BackupSettings>;
}

/// Publishes `next` if it differs from the current value.
fn publish(tx: &watch::Sender<BackupSettings>, next: BackupSettings) -> bool {
    tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    })
}

/// In-memory settings store.
#[derive(Debug)]
pub struct MemorySettingsStore {
    tx: watch::Sender<BackupSettings>,
}

impl MemorySettingsStore {
    /// Creates a store holding `settings`.
    pub fn new(settings: BackupSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx }
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new(BackupSettings::default())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    fn get(&self) -> BackupSettings {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<BackupSettings> {
        self.tx.subscribe()
    }

    async fn update(&self, change: SettingsUpdate) -> BackupResult<BackupSettings> {
        let mut next = self.get();
        change(&mut next);
        publish(&self.tx, next.clone());
        Ok(next)
    }

    async fn reset(&self) -> BackupResult<BackupSettings> {
        publish(&self.tx, BackupSettings::default());
        Ok(BackupSettings::default())
    }
}

/// Settings store backed by a JSON file.
///
/// Writes go to a temporary file in the same directory which is synced and
/// renamed over the target, so a crash leaves either the old or the new
/// record. A missing file loads as defaults.
///
/// Edits made by other processes are only picked up while a
/// [`SettingsFileWatch`] from [`FileSettingsStore::watch_file`] is alive.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    tx: Arc<watch::Sender<BackupSettings>>,
    write_lock: Arc<Mutex<()>>,
}

/// Pause that lets a burst of file events settle before reloading.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(50);

/// Republishes the settings file whenever it changes on disk.
///
/// Watching stops when this is dropped.
pub struct SettingsFileWatch {
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for SettingsFileWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsFileWatch").finish_non_exhaustive()
    }
}

impl FileSettingsStore {
    /// Loads the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> BackupResult<Self> {
        let path = path.into();
        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BackupSettings::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = ?path, "loaded backup settings");

        let (tx, _) = watch::channel(settings);
        Ok(Self {
            path,
            tx: Arc::new(tx),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts following edits made to the file by other processes.
    ///
    /// The containing directory is watched so atomic replacements are seen.
    /// A file that fails to parse is logged and the current value kept.
    /// Must be called inside a tokio runtime.
    pub fn watch_file(&self) -> BackupResult<SettingsFileWatch> {
        let dir = parent_dir(&self.path).to_path_buf();
        let name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| BackupError::Settings(format!("{} is not a file", self.path.display())))?;
        std::fs::create_dir_all(&dir)?;

        let (events_tx, mut events) = mpsc::channel::<()>(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            let ours = event.paths.iter().any(|p| p.file_name() == Some(name.as_os_str()));
            if ours && (event.kind.is_create() || event.kind.is_modify()) {
                // A full channel already has a reload pending.
                let _ = events_tx.try_send(());
            }
        })
        .map_err(watch_error)?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        let path = self.path.clone();
        let tx = Arc::clone(&self.tx);
        let lock = Arc::clone(&self.write_lock);
        tokio::spawn(async move {
            while events.recv().await.is_some() {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while events.try_recv().is_ok() {}
                reload(&path, &tx, &lock).await;
            }
        });

        tracing::info!(path = ?self.path, "watching settings file");
        Ok(SettingsFileWatch { _watcher: watcher })
    }

    async fn persist(&self, settings: &BackupSettings) -> BackupResult<()> {
        let bytes = serde_json::to_vec_pretty(settings)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| BackupError::Settings(format!("settings writer failed: {e}")))??;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn watch_error(e: notify::Error) -> BackupError {
    BackupError::Settings(format!("cannot watch settings file: {e}"))
}

/// Re-reads the file and publishes it. Holds the write lock so a reload
/// never overtakes an in-process update.
async fn reload(path: &Path, tx: &watch::Sender<BackupSettings>, lock: &Mutex<()>) {
    let _guard = lock.lock().await;
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = ?path, "settings file removed, keeping current values");
            return;
        }
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "failed to read settings file");
            return;
        }
    };
    match serde_json::from_slice::<BackupSettings>(&bytes) {
        Ok(settings) => {
            if publish(tx, settings) {
                tracing::info!(path = ?path, "settings changed on disk");
            }
        }
        Err(e) => tracing::warn!(path = ?path, error = %e, "ignoring unreadable settings file"),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    fn get(&self) -> BackupSettings {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<BackupSettings> {
        self.tx.subscribe()
    }

    async fn update(&self, change: SettingsUpdate) -> BackupResult<BackupSettings> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.get();
        change(&mut next);
        self.persist(&next).await?;
        publish(&self.tx, next.clone());
        Ok(next)
    }

    async fn reset(&self) -> BackupResult<BackupSettings> {
        let _guard = self.write_lock.lock().await;
        let defaults = BackupSettings::default();
        self.persist(&defaults).await?;
        publish(&self.tx, defaults.clone());
        Ok(defaults)
    }
}

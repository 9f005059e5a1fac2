//! Settings commands.

use lexisync_engine::{
    AutomaticBackupFrequency, BackupSettings, FileSettingsStore, SettingsStore,
    MAX_REMINDER_MINUTES, MIN_REMINDER_MINUTES,
};
use std::path::Path;

/// Fields to change; `None` leaves a field as it is.
#[derive(Debug, Default)]
pub struct Change {
    /// New automatic backup frequency.
    pub frequency: Option<AutomaticBackupFrequency>,
    /// New reminder interval in minutes.
    pub reminder_minutes: Option<u32>,
    /// Turns reminders on or off.
    pub reminder_enabled: Option<bool>,
    /// Allows or forbids backups over mobile data.
    pub use_mobile_data: Option<bool>,
}

impl Change {
    fn is_empty(&self) -> bool {
        self.frequency.is_none()
            && self.reminder_minutes.is_none()
            && self.reminder_enabled.is_none()
            && self.use_mobile_data.is_none()
    }

    fn apply(self, settings: &mut BackupSettings) {
        if let Some(frequency) = self.frequency {
            settings.automatic_backup_frequency = frequency;
        }
        if let Some(minutes) = self.reminder_minutes {
            settings.reminder_interval_minutes = minutes;
        }
        if let Some(enabled) = self.reminder_enabled {
            settings.reminder_enabled = enabled;
        }
        if let Some(mobile) = self.use_mobile_data {
            settings.use_mobile_data = mobile;
        }
    }
}

/// Prints the settings file.
pub async fn show(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileSettingsStore::open(path).await?;
    print_settings(&store.get(), format)
}

/// Applies `change` to the settings file.
pub async fn set(path: &Path, change: Change) -> Result<(), Box<dyn std::error::Error>> {
    if change.is_empty() {
        return Err("Nothing to change".into());
    }
    if let Some(minutes) = change.reminder_minutes {
        if !(MIN_REMINDER_MINUTES..=MAX_REMINDER_MINUTES).contains(&minutes) {
            eprintln!(
                "Note: reminders are scheduled every {}-{} minutes; {} will be clamped",
                MIN_REMINDER_MINUTES, MAX_REMINDER_MINUTES, minutes
            );
        }
    }

    let store = FileSettingsStore::open(path).await?;
    let settings = store.update(Box::new(move |s| change.apply(s))).await?;

    println!("✓ Settings updated");
    print_settings(&settings, "text")
}

/// Restores the default settings.
pub async fn reset(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileSettingsStore::open(path).await?;
    let settings = store.reset().await?;

    println!("✓ Settings reset to defaults");
    print_settings(&settings, "text")
}

fn print_settings(settings: &BackupSettings, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(settings)?),
        "text" => {
            println!("  Automatic backup: {}", settings.automatic_backup_frequency);
            println!("  Mobile data: {}", on_off(settings.use_mobile_data));
            println!("  Reminders: {}", on_off(settings.reminder_enabled));
            println!("  Reminder interval: {} min", settings.reminder_interval_minutes);
            match settings.last_backup_at {
                Some(at) => println!("  Last backup: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("  Last backup: never"),
            }
        }
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

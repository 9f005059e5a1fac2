//! LexiSync CLI
//!
//! Command-line backup and restore for the LexiSync dictionary.
//!
//! # Commands
//!
//! - `backup` - Upload the dictionary and remove older backups
//! - `restore` - Replace the dictionary with a backup
//! - `list` - Show the remote backups
//! - `settings` - Show or change the automatic backup settings
//! - `run` - Run the backup and reminder schedules until Ctrl-C

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::Remote;
use lexisync_engine::AutomaticBackupFrequency;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LexiSync dictionary backup tools.
#[derive(Parser)]
#[command(name = "lexisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dictionary database file
    #[arg(global = true, short, long, env = "LEXISYNC_STORE")]
    store: Option<PathBuf>,

    /// Path to the settings file
    #[arg(
        global = true,
        long,
        env = "LEXISYNC_SETTINGS",
        default_value = "lexisync-settings.json"
    )]
    settings: PathBuf,

    /// Keep backups in this directory instead of Google Drive
    #[arg(global = true, short, long, env = "LEXISYNC_REMOTE")]
    remote: Option<PathBuf>,

    /// Google Drive access token
    #[arg(global = true, long, env = "LEXISYNC_DRIVE_TOKEN", hide_env_values = true)]
    drive_token: Option<String>,

    /// Name of the remote backup folder
    #[arg(global = true, long, default_value = "Backups")]
    folder: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the dictionary and remove older backups
    Backup,

    /// Replace the dictionary with a backup
    Restore {
        /// Backup id (defaults to the newest backup)
        #[arg(long)]
        id: Option<String>,
    },

    /// Show the remote backups
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show or change the automatic backup settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Run the backup and reminder schedules until Ctrl-C
    Run,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Change one or more settings
    Set {
        /// Automatic backup frequency (off, daily, weekly, monthly)
        #[arg(long)]
        frequency: Option<AutomaticBackupFrequency>,

        /// Minutes between reminders (15-180)
        #[arg(long)]
        reminder_minutes: Option<u32>,

        /// Turn reminders on or off
        #[arg(long)]
        reminder: Option<Switch>,

        /// Allow automatic backups over mobile data
        #[arg(long)]
        mobile_data: Option<Switch>,
    },

    /// Restore the default settings
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> Self {
        matches!(switch, Switch::On)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let remote = Remote {
        dir: cli.remote,
        drive_token: cli.drive_token,
        folder: cli.folder,
    };

    match cli.command {
        Commands::Backup => {
            let store = cli.store.ok_or("Store path required for backup")?;
            commands::backup::run(&store, &cli.settings, &remote).await?;
        }
        Commands::Restore { id } => {
            let store = cli.store.ok_or("Store path required for restore")?;
            commands::restore::run(&store, &cli.settings, &remote, id.as_deref()).await?;
        }
        Commands::List { format } => {
            let store = cli.store.ok_or("Store path required for list")?;
            commands::list::run(&store, &cli.settings, &remote, &format).await?;
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show { format } => {
                commands::settings::show(&cli.settings, &format).await?;
            }
            SettingsAction::Set {
                frequency,
                reminder_minutes,
                reminder,
                mobile_data,
            } => {
                let change = commands::settings::Change {
                    frequency,
                    reminder_minutes,
                    reminder_enabled: reminder.map(bool::from),
                    use_mobile_data: mobile_data.map(bool::from),
                };
                commands::settings::set(&cli.settings, change).await?;
            }
            SettingsAction::Reset => {
                commands::settings::reset(&cli.settings).await?;
            }
        },
        Commands::Run => {
            let store = cli.store.ok_or("Store path required for run")?;
            commands::run::run(&store, &cli.settings, &remote).await?;
        }
        Commands::Version => {
            println!("LexiSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

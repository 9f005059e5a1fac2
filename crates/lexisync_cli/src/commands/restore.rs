//! Restore command.

use super::{Context, Remote};
use lexisync_engine::LocalStore;
use std::path::Path;
use tracing::info;

/// Replaces the dictionary with the chosen backup, or the newest one.
pub async fn run(
    store_path: &Path,
    settings_path: &Path,
    remote: &Remote,
    backup_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring {:?}", store_path);

    let ctx = Context::open(store_path, settings_path, remote).await?;
    let ctrl_c = ctx.cancel_on_ctrl_c();
    let progress = ctx.log_progress();

    let result = ctx.orchestrator.restore(backup_id).await;
    ctrl_c.abort();
    progress.abort();
    result?;

    // The orchestrator leaves the store closed after a successful restore.
    ctx.store.reopen().await?;

    println!("✓ Restore completed");
    println!("  Store: {:?}", ctx.store.path());
    match backup_id {
        Some(id) => println!("  Backup: {}", id),
        None => println!("  Backup: newest"),
    }

    Ok(())
}

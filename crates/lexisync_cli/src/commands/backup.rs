//! Manual backup command.

use super::{format_size, Context, Remote};
use std::path::Path;
use tracing::info;

/// Uploads the dictionary and removes the older backups.
pub async fn run(
    store_path: &Path,
    settings_path: &Path,
    remote: &Remote,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Backing up {:?}", store_path);

    let ctx = Context::open(store_path, settings_path, remote).await?;
    let ctrl_c = ctx.cancel_on_ctrl_c();
    let progress = ctx.log_progress();

    let result = ctx.orchestrator.backup().await;
    ctrl_c.abort();
    progress.abort();
    let meta = result?;

    println!("✓ Backup created successfully");
    println!("  Name: {}", meta.name);
    println!("  Id: {}", meta.id);
    println!("  Size: {}", format_size(meta.size_bytes));
    println!("  Created: {}", meta.created_time.format("%Y-%m-%d %H:%M:%S UTC"));

    Ok(())
}

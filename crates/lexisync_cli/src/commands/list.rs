//! Backup listing command.

use super::{format_size, Context, Remote};
use std::path::Path;

/// Prints the remote backups, newest first.
pub async fn run(
    store_path: &Path,
    settings_path: &Path,
    remote: &Remote,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open(store_path, settings_path, remote).await?;
    let mut backups = ctx.orchestrator.list_backups().await?;
    backups.sort_by(|a, b| b.created_time.cmp(&a.created_time));

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&backups)?),
        "text" => {
            if backups.is_empty() {
                println!("No backups in '{}'", remote.folder);
                return Ok(());
            }
            println!("=== Backups in '{}' ===", remote.folder);
            for meta in &backups {
                println!(
                    "  {}  {:>10}  {}",
                    meta.created_time.format("%Y-%m-%d %H:%M:%S"),
                    format_size(meta.size_bytes),
                    meta.name
                );
                println!("    id: {}", meta.id);
            }
        }
        other => return Err(format!("Unknown format: {other}").into()),
    }

    Ok(())
}

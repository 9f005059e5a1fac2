//! Foreground scheduler command.

use super::{Context, Remote};
use lexisync_engine::{BackupEngine, EngineConfig, TracingNotifier};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the backup and reminder schedules until Ctrl-C.
pub async fn run(
    store_path: &Path,
    settings_path: &Path,
    remote: &Remote,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open(store_path, settings_path, remote).await?;
    let progress = ctx.log_progress();

    // Picks up `lexisync settings set` from other invocations.
    let _watch = ctx.settings.watch_file()?;

    let engine = BackupEngine::with_tokio_queue(
        ctx.orchestrator.clone(),
        ctx.settings.clone(),
        Arc::new(TracingNotifier),
        EngineConfig::default(),
    );
    engine.start();
    info!(settings = ?settings_path, "scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("stopping");
    ctx.orchestrator.cancel();
    engine.shutdown().await;
    progress.abort();

    Ok(())
}

//! Queue a video for rendering.

use std::path::PathBuf;

use buttercut_common::config::AppConfig;
use buttercut_job_model::job::RenderJob;
use buttercut_job_model::store::JobStore;

use super::{open_store, read_overlays, require_file};

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    overlays: Option<String>,
    render_now: bool,
) -> anyhow::Result<()> {
    let video = require_file(&video)?;
    let overlays = read_overlays(overlays.as_deref())?;
    let store = open_store(config)?;

    let file_name = video
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input.mp4".to_string());

    let mut job = RenderJob::new_queued(PathBuf::new(), overlays);
    job.input_path = config.storage_dir.join(format!("{}_{file_name}", job.id));

    tokio::fs::create_dir_all(&config.storage_dir).await?;
    tokio::fs::copy(&video, &job.input_path).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to copy {} into storage: {e}",
            video.display()
        )
    })?;
    store
        .upsert(&job)
        .map_err(|e| anyhow::anyhow!("Failed to record job: {e}"))?;

    tracing::info!(job_id = %job.id, input = %job.input_path.display(), "Job queued");
    println!("{}", serde_json::to_string_pretty(&job.status_view())?);

    if render_now {
        super::process::run(config, &job.id).await?;
    }
    Ok(())
}

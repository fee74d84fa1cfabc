//! Subcommand implementations and the helpers they share.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use buttercut_common::config::AppConfig;
use buttercut_job_model::job::RenderJob;
use buttercut_job_model::store::{FileJobStore, JobStore};
use buttercut_render_engine::worker::RenderWorker;
use serde_json::Value;

pub mod check;
pub mod plan;
pub mod probe;
pub mod process;
pub mod result;
pub mod status;
pub mod submit;

/// Open the job store under the configured storage directory.
pub fn open_store(config: &AppConfig) -> anyhow::Result<Arc<FileJobStore>> {
    let store = FileJobStore::open(config.jobs_dir())
        .with_context(|| format!("Failed to open job store at {}", config.jobs_dir().display()))?;
    Ok(Arc::new(store))
}

/// Build a worker writing through the file store.
pub fn open_worker(config: &AppConfig) -> anyhow::Result<RenderWorker> {
    let store: Arc<dyn JobStore> = open_store(config)?;
    Ok(RenderWorker::new(
        store,
        config.render.clone(),
        config.storage_dir.clone(),
    ))
}

/// Fetch a job or fail with a readable error.
pub fn load_job(store: &dyn JobStore, job_id: &str) -> anyhow::Result<RenderJob> {
    store
        .get(job_id)
        .with_context(|| format!("Failed to read job {job_id}"))?
        .ok_or_else(|| anyhow::anyhow!("Job not found: {job_id}"))
}

/// Decode an `--overlays` argument: inline JSON, or `@path` to a file.
///
/// Text that is not JSON is kept verbatim, matching what an upload would
/// store.
pub fn read_overlays(arg: Option<&str>) -> anyhow::Result<Value> {
    let text = match arg {
        None => return Ok(Value::Array(Vec::new())),
        Some(arg) => match arg.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read overlays from {path}"))?,
            None => arg.to_string(),
        },
    };
    Ok(RenderJob::overlays_from_text(&text))
}

/// Fail early when a source path does not name a file.
pub fn require_file(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.is_file() {
        anyhow::bail!("Video not found: {}", path.display());
    }
    Ok(path.to_path_buf())
}

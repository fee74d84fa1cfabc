//! Render job execution.
//!
//! [`RenderWorker::process_job`] drives one queued job through its whole
//! lifecycle:
//!
//! ```text
//! claim ─► Queued→Processing ─► validate ─► probe ─► compile ─► supervise
//!                                                                   │
//!                       Done / Failed / Cancelled ◄── finalize ◄────┘
//! ```
//!
//! Exactly one terminal state is written per dispatch, after every
//! progress write. The render itself runs on its own task so a panic in
//! any stage still ends the job as `Failed`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buttercut_common::config::RenderSettings;
use buttercut_common::error::{bounded_message, ButtercutError, ButtercutResult};
use buttercut_job_model::error::JobError;
use buttercut_job_model::job::{JobStatus, RenderJob};
use buttercut_job_model::overlay::{validate_overlays, ValidationError};
use buttercut_job_model::store::JobStore;
use tokio_util::sync::CancellationToken;

use crate::compiler::{Canvas, EncodeSettings, GraphCompiler};
use crate::probe::probe_video;
use crate::supervisor::{EncoderInvocation, RenderOutcome, Supervisor, SupervisorOptions};

/// Why a render did not produce an artifact.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid overlays: {0}")]
    Validation(#[from] ValidationError),

    #[error("Input video not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("{0}")]
    Spawn(String),

    #[error("{}", runtime_message(.exit_code, .diagnostic))]
    Runtime {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("Encoder ended without completion signal{}", detail(.diagnostic))]
    IncompleteStream { diagnostic: String },

    #[error("Finalization failed: {0}")]
    Finalization(String),

    #[error("Render cancelled")]
    Cancelled,

    #[error("Render exceeded time limit of {}s", .limit.as_secs())]
    TimedOut { limit: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RenderError {
    /// Terminal status a job takes when its render ends with this error.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            RenderError::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }
}

fn runtime_message(exit_code: &Option<i32>, diagnostic: &str) -> String {
    let diagnostic = diagnostic.trim();
    match (diagnostic.is_empty(), *exit_code) {
        (false, _) => diagnostic.to_string(),
        (true, Some(code)) => format!("Encoder exited with status {code}"),
        (true, None) => "Encoder terminated by signal".to_string(),
    }
}

fn detail(diagnostic: &str) -> String {
    let diagnostic = diagnostic.trim();
    if diagnostic.is_empty() {
        String::new()
    } else {
        format!(": {diagnostic}")
    }
}

/// Executes queued render jobs against a [`JobStore`].
///
/// Cloning is cheap and clones share the in-flight job set, so a job
/// dispatched twice through any clone is rejected.
#[derive(Clone)]
pub struct RenderWorker {
    store: Arc<dyn JobStore>,
    settings: RenderSettings,
    storage_dir: PathBuf,
    active: Arc<Mutex<HashSet<String>>>,
}

impl RenderWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        settings: RenderSettings,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            settings,
            storage_dir: storage_dir.into(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Where the artifact for `job_id` is published.
    pub fn output_path_for(&self, job_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{job_id}_output.mp4"))
    }

    /// Render a queued job.
    ///
    /// Errors are returned only when the job could not be started (unknown
    /// id, not `Queued`, already in flight, store unavailable) or when the
    /// terminal state could not be persisted. Render failures are recorded
    /// on the job and returned as `Ok` with a `Failed` or `Cancelled` job.
    pub async fn process_job(
        &self,
        job_id: &str,
        cancel: CancellationToken,
    ) -> ButtercutResult<RenderJob> {
        let _claim = self.claim(job_id)?;

        let mut job = self
            .store
            .get(job_id)
            .map_err(store_error)?
            .ok_or_else(|| ButtercutError::job_not_found(job_id))?;

        job.transition(JobStatus::Processing)
            .map_err(transition_error)?;
        self.store.upsert(&job).map_err(store_error)?;
        tracing::info!(job_id, input = %job.input_path.display(), "Job processing");

        let unit = RenderUnit {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            storage_dir: self.storage_dir.clone(),
            output_path: self.output_path_for(job_id),
            cancel,
            job: job.clone(),
        };

        let (mut job, result) = match tokio::spawn(unit.run()).await {
            Ok(finished) => finished,
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "render task aborted".to_string()
                };
                tracing::error!(job_id, reason = %reason, "Render task did not finish");
                // Keep progress written before the panic.
                let latest = self
                    .store
                    .get(job_id)
                    .ok()
                    .flatten()
                    .filter(|stored| stored.status == JobStatus::Processing)
                    .unwrap_or(job);
                (latest, Err(RenderError::Internal(reason)))
            }
        };

        self.settle(&mut job, result)?;
        self.store.upsert(&job).map_err(|e| {
            tracing::error!(job_id, status = %job.status, error = %e, "Failed to persist terminal state");
            store_error(e)
        })?;

        tracing::info!(
            job_id,
            status = %job.status,
            message = ?job.message,
            "Job finished"
        );
        Ok(job)
    }

    /// Apply the render result to `job` as its terminal state.
    fn settle(
        &self,
        job: &mut RenderJob,
        result: Result<PathBuf, RenderError>,
    ) -> ButtercutResult<()> {
        let error = match result {
            Ok(artifact) => match job.complete(artifact) {
                Ok(()) => return Ok(()),
                Err(e) => RenderError::Finalization(e.to_string()),
            },
            Err(error) => error,
        };

        let message = bounded_message(&error.to_string(), self.settings.diagnostic_chars);
        tracing::warn!(job_id = %job.id, error = %error, "Render did not complete");
        let settled = match error.terminal_status() {
            JobStatus::Cancelled => job.cancel(message),
            _ => job.fail(message),
        };
        settled.map_err(transition_error)
    }

    fn claim(&self, job_id: &str) -> ButtercutResult<ActiveJobClaim> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(job_id.to_string()) {
            tracing::warn!(job_id, "Rejected duplicate dispatch");
            return Err(ButtercutError::already_processing(job_id));
        }
        Ok(ActiveJobClaim {
            job_id: job_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }
}

/// Marks a job id as in flight until dropped.
struct ActiveJobClaim {
    job_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ActiveJobClaim {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.job_id);
    }
}

/// Everything one render needs, owned so it can run on its own task.
struct RenderUnit {
    store: Arc<dyn JobStore>,
    settings: RenderSettings,
    storage_dir: PathBuf,
    output_path: PathBuf,
    cancel: CancellationToken,
    job: RenderJob,
}

impl RenderUnit {
    async fn run(mut self) -> (RenderJob, Result<PathBuf, RenderError>) {
        let result = self.render().await;
        (self.job, result)
    }

    async fn render(&mut self) -> Result<PathBuf, RenderError> {
        let job_id = self.job.id.clone();

        let overlays = validate_overlays(&self.job.overlays, &self.storage_dir)?;
        tracing::debug!(job_id = %job_id, overlays = overlays.len(), "Overlays validated");

        let input = self.job.input_path.clone();
        if !input.is_file() {
            return Err(RenderError::MissingInput(input));
        }

        let info = probe_video(&self.settings.ffprobe_bin, &input).await;
        let canvas = info.canvas_or(Canvas::new(
            self.settings.default_canvas_width,
            self.settings.default_canvas_height,
        ));

        let compiled = GraphCompiler::new(self.settings.font_size).compile(&overlays, canvas);
        let staging = staging_path(&self.output_path);
        remove_if_present(&staging).await;

        let invocation = EncoderInvocation::new(
            self.settings.ffmpeg_bin.clone(),
            compiled.encoder_args(&input, &staging, &EncodeSettings::from(&self.settings)),
        );
        tracing::info!(
            job_id = %job_id,
            stages = compiled.stages.len(),
            extra_inputs = compiled.extra_inputs.len(),
            duration_secs = info.duration_seconds,
            canvas_width = canvas.width,
            canvas_height = canvas.height,
            "Starting render"
        );

        let supervisor = Supervisor::new(SupervisorOptions::from(&self.settings));
        let store = &self.store;
        let job = &mut self.job;
        let outcome = supervisor
            .run(&invocation, info.duration_seconds, &self.cancel, |percent| {
                if job.advance_progress(percent) {
                    if let Err(e) = store.upsert(job) {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to persist progress");
                    }
                }
            })
            .await;

        let result = match outcome {
            Ok(RenderOutcome::Completed) => finalize(&staging, &self.output_path).await,
            Ok(RenderOutcome::Failed {
                exit_code,
                diagnostic,
            }) => Err(RenderError::Runtime {
                exit_code,
                diagnostic,
            }),
            Ok(RenderOutcome::Incomplete { diagnostic }) => {
                Err(RenderError::IncompleteStream { diagnostic })
            }
            Ok(RenderOutcome::Cancelled) => Err(RenderError::Cancelled),
            Ok(RenderOutcome::TimedOut { limit }) => Err(RenderError::TimedOut { limit }),
            Err(e) => Err(RenderError::Spawn(e.to_string())),
        };

        if result.is_err() {
            remove_if_present(&staging).await;
        }
        result
    }
}

/// Publish the staged encoder output under its final name.
async fn finalize(staging: &Path, output: &Path) -> Result<PathBuf, RenderError> {
    let staged = tokio::fs::metadata(staging).await.map_err(|e| {
        RenderError::Finalization(format!(
            "encoder reported success but produced no output at {}: {e}",
            staging.display()
        ))
    })?;
    if !staged.is_file() {
        return Err(RenderError::Finalization(format!(
            "encoder output {} is not a regular file",
            staging.display()
        )));
    }

    tokio::fs::rename(staging, output).await.map_err(|e| {
        RenderError::Finalization(format!(
            "failed to move {} to {}: {e}",
            staging.display(),
            output.display()
        ))
    })?;

    if !output.is_file() {
        return Err(RenderError::Finalization(format!(
            "output {} missing after publish",
            output.display()
        )));
    }
    tracing::debug!(output = %output.display(), bytes = staged.len(), "Output published");
    Ok(output.to_path_buf())
}

/// `<dir>/<stem>.partial.<ext>` next to `output`.
///
/// The extension is kept so the encoder still infers the container.
pub fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(name)
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("render panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("render panicked: {message}")
    } else {
        "render panicked".to_string()
    }
}

fn store_error(error: JobError) -> ButtercutError {
    ButtercutError::store(error.to_string())
}

fn transition_error(error: JobError) -> ButtercutError {
    match error {
        JobError::InvalidTransition { id, from, to } => ButtercutError::InvalidTransition {
            id,
            from: from.to_string(),
            to: to.to_string(),
        },
        other => ButtercutError::store(other.to_string()),
    }
}

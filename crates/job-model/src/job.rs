//! Render job records and their lifecycle rules.
//!
//! A job moves strictly forward:
//!
//! ```text
//! Queued ──► Processing ──┬──► Done
//!                         ├──► Failed
//!                         └──► Cancelled
//! ```
//!
//! `Done`, `Failed`, and `Cancelled` are terminal. Progress only grows
//! while a job is `Processing`.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

/// Message stored on freshly submitted jobs.
pub const QUEUED_MESSAGE: &str = "Uploaded. Queued for processing";

/// Lifecycle state of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted unit of work tracking one render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    /// Opaque job identifier.
    pub id: String,

    pub status: JobStatus,

    /// Percentage in `[0, 100]`.
    pub progress: f64,

    /// Source video.
    pub input_path: PathBuf,

    /// Rendered artifact. Set only together with `Done`.
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    /// Overlay payload exactly as submitted. Text that was not valid JSON
    /// is kept as a string.
    #[serde(default)]
    pub overlays: Value,

    /// Human-readable status or failure description.
    #[serde(default)]
    pub message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    /// Create a queued job with a fresh id.
    pub fn new_queued(input_path: impl Into<PathBuf>, overlays: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), input_path, overlays)
    }

    /// Create a queued job with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, input_path: impl Into<PathBuf>, overlays: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            input_path: input_path.into(),
            output_path: None,
            overlays,
            message: Some(QUEUED_MESSAGE.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Decode an overlay payload submitted as text.
    ///
    /// Blank text is an empty list; text that does not parse is preserved
    /// verbatim so status queries can still show it.
    pub fn overlays_from_text(text: &str) -> Value {
        if text.trim().is_empty() {
            return Value::Array(Vec::new());
        }
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    }

    /// Move to `next`, refreshing `updated_at`.
    ///
    /// Entering `Processing` resets progress to zero.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next == JobStatus::Processing {
            self.progress = 0.0;
            self.message = Some("Processing".to_string());
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Raise progress to `percent` (clamped to `[0, 100]`).
    ///
    /// Returns `false` and leaves the record untouched when the job is not
    /// processing or the value would not increase progress.
    pub fn advance_progress(&mut self, percent: f64) -> bool {
        if self.status != JobStatus::Processing || !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.progress {
            return false;
        }
        self.progress = percent;
        self.touch();
        true
    }

    /// Mark the job done with `artifact` as its output.
    ///
    /// The artifact must exist on disk right now, otherwise the job is left
    /// in `Processing` and an error is returned.
    pub fn complete(&mut self, artifact: PathBuf) -> Result<(), JobError> {
        if !artifact.is_file() {
            return Err(JobError::MissingArtifact { path: artifact });
        }
        self.transition(JobStatus::Done)?;
        self.progress = 100.0;
        self.output_path = Some(artifact);
        self.message = Some("Render complete".to_string());
        Ok(())
    }

    /// Mark the job failed with a user-visible message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.output_path = None;
        self.message = Some(message.into());
        Ok(())
    }

    /// Mark the job cancelled.
    pub fn cancel(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Cancelled)?;
        self.output_path = None;
        self.message = Some(message.into());
        Ok(())
    }

    /// The artifact, if the job is done and the file is present right now.
    pub fn servable_output(&self) -> Option<&Path> {
        if self.status != JobStatus::Done {
            return None;
        }
        self.output_path
            .as_deref()
            .filter(|path| path.is_file())
    }

    /// Read-only projection returned by status queries.
    pub fn status_view(&self) -> JobStatusView {
        let metadata = match &self.overlays {
            Value::Array(_) => self.overlays.clone(),
            Value::Null => Value::Null,
            Value::String(raw) => serde_json::json!({ "raw": raw }),
            other => serde_json::json!({ "raw": other.to_string() }),
        };
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            metadata,
        }
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Keep updated_at monotonic even if the wall clock steps back.
        self.updated_at = now.max(self.updated_at);
    }
}

/// Snapshot served to status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn processing_job() -> RenderJob {
        let mut job = RenderJob::with_id("job-1", "/tmp/in.mp4", json!([]));
        job.transition(JobStatus::Processing).unwrap();
        job
    }

    #[test]
    fn test_new_job_is_queued_without_output() {
        let job = RenderJob::new_queued("/tmp/in.mp4", json!([]));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.output_path.is_none());
        assert_eq!(job.message.as_deref(), Some(QUEUED_MESSAGE));
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_only_forward_edges_are_legal() {
        use JobStatus::*;
        let all = [Queued, Processing, Done, Failed, Cancelled];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Queued, Processing)
                        | (Processing, Done)
                        | (Processing, Failed)
                        | (Processing, Cancelled)
                );
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_job_rejects_reprocessing() {
        let mut job = processing_job();
        job.fail("boom").unwrap();
        let err = job.transition(JobStatus::Processing).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Processing,
                ..
            }
        ));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_processing_resets_progress() {
        let mut job = RenderJob::with_id("job-2", "/tmp/in.mp4", json!([]));
        job.progress = 42.0;
        job.transition(JobStatus::Processing).unwrap();
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = processing_job();
        assert!(job.advance_progress(10.0));
        assert!(!job.advance_progress(5.0));
        assert!(!job.advance_progress(10.0));
        assert!(job.advance_progress(250.0));
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn test_progress_ignored_outside_processing() {
        let mut job = RenderJob::with_id("job-3", "/tmp/in.mp4", json!([]));
        assert!(!job.advance_progress(50.0));
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_complete_requires_artifact_on_disk() {
        let mut job = processing_job();
        let missing = std::env::temp_dir().join(format!("buttercut_missing_{}.mp4", job.id));
        let err = job.complete(missing).unwrap_err();
        assert!(matches!(err, JobError::MissingArtifact { .. }));
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.output_path.is_none());
    }

    #[test]
    fn test_complete_sets_output_and_full_progress() {
        let artifact =
            std::env::temp_dir().join(format!("buttercut_artifact_{}.mp4", uuid::Uuid::new_v4()));
        std::fs::write(&artifact, b"mp4").unwrap();

        let mut job = processing_job();
        job.complete(artifact.clone()).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.servable_output(), Some(artifact.as_path()));

        std::fs::remove_file(&artifact).ok();
        assert!(job.servable_output().is_none());
    }

    #[test]
    fn test_failed_job_is_never_servable() {
        let mut job = processing_job();
        job.output_path = Some(PathBuf::from("/definitely/not/here.mp4"));
        job.fail("no such filter").unwrap();
        assert!(job.output_path.is_none());
        assert!(job.servable_output().is_none());
    }

    #[test]
    fn test_overlays_from_text() {
        assert_eq!(RenderJob::overlays_from_text(""), json!([]));
        assert_eq!(
            RenderJob::overlays_from_text(r#"[{"type":"text","content":"hi"}]"#),
            json!([{ "type": "text", "content": "hi" }])
        );
        assert_eq!(
            RenderJob::overlays_from_text("[{not json"),
            Value::String("[{not json".to_string())
        );
    }

    #[test]
    fn test_status_view_falls_back_to_raw_payload() {
        let job = RenderJob::with_id(
            "job-4",
            "/tmp/in.mp4",
            RenderJob::overlays_from_text("{broken"),
        );
        let view = job.status_view();
        assert_eq!(view.metadata, json!({ "raw": "{broken" }));
        assert_eq!(view.status, JobStatus::Queued);

        let job = RenderJob::with_id("job-5", "/tmp/in.mp4", json!({ "type": "text" }));
        assert_eq!(
            job.status_view().metadata,
            json!({ "raw": r#"{"type":"text"}"# })
        );
    }

    #[test]
    fn test_record_serialization_uses_lowercase_status() {
        let job = processing_job();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "processing");
        let parsed: RenderJob = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, job);
    }

    proptest! {
        #[test]
        fn prop_progress_is_monotonic(updates in proptest::collection::vec(-50.0f64..150.0, 0..64)) {
            let mut job = processing_job();
            let mut last = job.progress;
            for update in updates {
                job.advance_progress(update);
                prop_assert!(job.progress >= last);
                prop_assert!((0.0..=100.0).contains(&job.progress));
                last = job.progress;
            }
        }

        #[test]
        fn prop_status_walk_only_moves_forward(steps in proptest::collection::vec(0usize..5, 0..16)) {
            use JobStatus::*;
            let all = [Queued, Processing, Done, Failed, Cancelled];
            let mut job = RenderJob::with_id("walk", "/tmp/in.mp4", json!([]));
            for step in steps {
                let before = job.status;
                let target = all[step];
                let result = job.transition(target);
                prop_assert_eq!(result.is_ok(), before.can_transition_to(target));
                if result.is_err() {
                    prop_assert_eq!(job.status, before);
                }
                if before.is_terminal() {
                    prop_assert_eq!(job.status, before);
                }
            }
        }
    }
}

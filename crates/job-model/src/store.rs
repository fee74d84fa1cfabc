//! Job store contract and implementations.
//!
//! The render worker only ever reads a job by id and writes the whole
//! record back. Each `upsert` replaces the record atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::JobError;
use crate::job::RenderJob;

/// Persistence for render job records, keyed by job id.
pub trait JobStore: Send + Sync {
    /// Fetch a job, `None` if the id is unknown.
    fn get(&self, id: &str) -> Result<Option<RenderJob>, JobError>;

    /// Insert or replace the record for `job.id`.
    fn upsert(&self, job: &RenderJob) -> Result<(), JobError>;
}

/// In-process store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, RenderJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &str) -> Result<Option<RenderJob>, JobError> {
        let jobs = self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(jobs.get(id).cloned())
    }

    fn upsert(&self, job: &RenderJob) -> Result<(), JobError> {
        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }
}

/// Store that keeps one pretty-printed JSON file per job.
///
/// Writes go to a temporary sibling and are renamed into place, so a
/// reader never observes a half-written record.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JobError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| JobError::IoError {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, JobError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(JobError::InvalidId { id: id.to_string() });
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl JobStore for FileJobStore {
    fn get(&self, id: &str) -> Result<Option<RenderJob>, JobError> {
        let path = self.record_path(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JobError::IoError { path, source: e }),
        };
        let job = serde_json::from_str(&content)
            .map_err(|e| JobError::ParseError { path, source: e })?;
        Ok(Some(job))
    }

    fn upsert(&self, job: &RenderJob) -> Result<(), JobError> {
        let path = self.record_path(&job.id)?;
        let json = serde_json::to_string_pretty(job).map_err(|e| JobError::ParseError {
            path: path.clone(),
            source: e,
        })?;

        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", job.id, uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp_path, json).map_err(|e| JobError::IoError {
            path: tmp_path.clone(),
            source: e,
        })?;
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            std::fs::remove_file(&tmp_path).ok();
            return Err(JobError::IoError { path, source: e });
        }

        tracing::trace!(job_id = %job.id, status = %job.status, "Job record written");
        Ok(())
    }
}

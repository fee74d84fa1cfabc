//! Errors raised by the job model and job stores.

use std::path::PathBuf;

use crate::job::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Output artifact missing: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("Invalid job id: {id:?}")]
    InvalidId { id: String },

    #[error("I/O error at {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
}

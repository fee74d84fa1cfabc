//! Error types shared across Buttercut crates.

/// Top-level error type for Buttercut operations.
#[derive(Debug, thiserror::Error)]
pub enum ButtercutError {
    #[error("Failed to start encoder: {message}")]
    Spawn { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Job store error: {message}")]
    Store { message: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job {id} is already being processed")]
    AlreadyProcessing { id: String },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ButtercutError.
pub type ButtercutResult<T> = Result<T, ButtercutError>;

impl ButtercutError {
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    pub fn already_processing(id: impl Into<String>) -> Self {
        Self::AlreadyProcessing { id: id.into() }
    }
}

/// Truncate `text` to at most `max_chars` characters, respecting UTF-8
/// boundaries. Leading and trailing whitespace is trimmed first.
pub fn bounded_message(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => trimmed[..byte_idx].to_string(),
        None => trimmed.to_string(),
    }
}

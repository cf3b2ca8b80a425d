use std::fmt::Display;

use thiserror::Error;

use crate::schedule::types::JobStatus;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid job parameters: {0}")]
    Validation(String),

    /// A store write whose expected predecessor status did not match.
    #[error("job {id} is {status}, transition rejected")]
    Concurrency { id: String, status: JobStatus },

    /// An operator action not allowed in the job's current status.
    #[error("cannot {action} job {id} with status {status}")]
    InvalidState {
        id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("job store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("failed to encode job record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("no processor registered for job type {0}")]
    NoProcessor(crate::schedule::types::JobType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    /// The input artifact is missing or unusable.
    Input,
    /// An external process failed to spawn or exited unsuccessfully.
    Process,
    /// A remote backend (download source, translator) failed.
    Backend,
    Io,
    Cancelled,
}

impl Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageErrorKind::Input => "input",
            StageErrorKind::Process => "process",
            StageErrorKind::Backend => "backend",
            StageErrorKind::Io => "io",
            StageErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure reported by a stage collaborator. Recorded into `job.error`.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Input, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Process, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Backend, message)
    }

    pub fn cancelled() -> Self {
        Self::new(StageErrorKind::Cancelled, "stage cancelled")
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        Self::new(StageErrorKind::Io, e.to_string())
    }
}

impl From<reqwest::Error> for StageError {
    fn from(e: reqwest::Error) -> Self {
        Self::backend(e.to_string())
    }
}

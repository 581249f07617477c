// src/error.rs

use thiserror::Error;

/// Expected job-level failure conditions. Anything genuinely unexpected
/// travels through `Other` with its original message intact; retry policy
/// belongs to the external scheduler, never to this crate.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("input not found: {0}")]
    InputNotFound(String),

    #[error("entry/exit capture counts differ: entry={entry}, exit={exit}")]
    CountMismatch { entry: usize, exit: usize },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("failed to decode image: {0}")]
    DecodeFailure(String),

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type JobResult<T> = Result<T, JobError>;

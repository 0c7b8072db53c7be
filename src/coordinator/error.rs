use thiserror::Error;

use crate::chunk::ChunkError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Resume lookup failed: {0}")]
    Resolve(TransportError),

    #[error("Chunk {index} failed: {source}")]
    ChunkFailed {
        index: u32,
        #[source]
        source: TransportError,
    },

    #[error("Merge rejected, missing chunks {missing:?}")]
    Incomplete { missing: Vec<u32> },

    #[error("Merge failed: {0}")]
    Merge(TransportError),

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Upload cancelled")]
    Cancelled,
}

impl CoordinatorError {
    /// Label used for the failed-upload metric.
    pub fn reason(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidStateTransition(_) => "invalid_state",
            CoordinatorError::Resolve(_) => "resolve",
            CoordinatorError::ChunkFailed { .. } => "chunk",
            CoordinatorError::Incomplete { .. } => "incomplete",
            CoordinatorError::Merge(_) => "merge",
            CoordinatorError::Chunk(_) => "read",
            CoordinatorError::Worker(_) => "worker",
            CoordinatorError::Cancelled => "cancelled",
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

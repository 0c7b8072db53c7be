use thiserror::Error;

use crate::chunk::ChunkError;
use crate::coordinator::CoordinatorError;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    #[error("File {id} cannot be retried while {state}")]
    NotRetriable { id: String, state: &'static str },

    #[error("File {0} has not been started")]
    NotStarted(String),

    #[error("Upload {id} failed: {error}")]
    Failed { id: String, error: String },

    #[error("Cannot read file: {0}")]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Upload(#[from] CoordinatorError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;

use thiserror::Error;

use crate::chunk::ChunkError;
use crate::session::SessionError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Upload {upload_id} is incomplete, missing chunks {missing:?}")]
    Incomplete { upload_id: String, missing: Vec<u32> },

    #[error("Unknown upload session: {0}")]
    UnknownSession(String),

    #[error("Upload {0} was cancelled")]
    Cancelled(String),

    #[error("Whole-file checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Assembled size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Stored chunk {index} is corrupted: {reason}")]
    ChunkCorrupted { index: u32, reason: String },

    #[error("Invalid file name: {0}")]
    InvalidFileName(#[from] ChunkError),

    #[error("Chunk store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssemblyError {
    /// Failures caused by the stored bytes themselves; the session cannot be merged
    /// as-is and its chunks are discarded.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            AssemblyError::ChecksumMismatch { .. }
                | AssemblyError::SizeMismatch { .. }
                | AssemblyError::ChunkCorrupted { .. }
        )
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AssemblyError::Incomplete { .. } => "incomplete",
            AssemblyError::UnknownSession(_) => "unknown_session",
            AssemblyError::Cancelled(_) => "cancelled",
            AssemblyError::ChecksumMismatch { .. } => "checksum_mismatch",
            AssemblyError::SizeMismatch { .. } => "size_mismatch",
            AssemblyError::ChunkCorrupted { .. } => "chunk_corrupted",
            AssemblyError::InvalidFileName(_) => "invalid_file_name",
            AssemblyError::Store(_) | AssemblyError::Session(_) | AssemblyError::Io(_) => {
                "internal"
            }
        }
    }
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;

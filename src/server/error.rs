use thiserror::Error;

use crate::assembler::AssemblyError;
use crate::session::SessionError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Payload too large: {0}")]
    TooLarge(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Presigned upload denied: {0}")]
    PresignDenied(String),

    #[error("Unknown upload session: {0}")]
    UnknownSession(String),

    #[error("Upload {upload_id} is incomplete, missing chunks {missing:?}")]
    Incomplete { upload_id: String, missing: Vec<u32> },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Chunk store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Assembly error: {0}")]
    Assembly(AssemblyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Stable machine-readable code carried in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            ServiceError::TooLarge(_) => "PAYLOAD_TOO_LARGE",
            ServiceError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            ServiceError::Integrity(_) => "INTEGRITY_ERROR",
            ServiceError::PresignDenied(_) => "PRESIGN_DENIED",
            ServiceError::UnknownSession(_) => "UNKNOWN_SESSION",
            ServiceError::Incomplete { .. } => "INCOMPLETE_SESSION",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Store(_)
            | ServiceError::Session(_)
            | ServiceError::Assembly(_)
            | ServiceError::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::PresignDenied(_) => 403,
            ServiceError::UnknownSession(_) => 404,
            ServiceError::Incomplete { .. } | ServiceError::Conflict(_) => 409,
            ServiceError::TooLarge(_) => 413,
            ServiceError::UnsupportedType(_) => 415,
            ServiceError::ChecksumMismatch { .. } | ServiceError::Integrity(_) => 422,
            ServiceError::Store(_)
            | ServiceError::Session(_)
            | ServiceError::Assembly(_)
            | ServiceError::Io(_) => 500,
        }
    }

    /// Label used for the rejected-chunk metric.
    pub fn reason(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::UnsupportedType(_) => "unsupported_type",
            ServiceError::TooLarge(_) => "too_large",
            ServiceError::ChecksumMismatch { .. } => "checksum_mismatch",
            ServiceError::Conflict(_) => "conflict",
            _ => "other",
        }
    }
}

impl From<AssemblyError> for ServiceError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::Incomplete { upload_id, missing } => {
                ServiceError::Incomplete { upload_id, missing }
            }
            AssemblyError::UnknownSession(id) => ServiceError::UnknownSession(id),
            AssemblyError::Cancelled(id) => {
                ServiceError::Conflict(format!("upload {id} was cancelled"))
            }
            AssemblyError::ChecksumMismatch { expected, actual } => {
                ServiceError::ChecksumMismatch { expected, actual }
            }
            err @ (AssemblyError::SizeMismatch { .. } | AssemblyError::ChunkCorrupted { .. }) => {
                ServiceError::Integrity(err.to_string())
            }
            AssemblyError::InvalidFileName(e) => ServiceError::Validation(e.to_string()),
            other => ServiceError::Assembly(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

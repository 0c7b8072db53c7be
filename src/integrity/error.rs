use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid checksum encoding: {0}")]
    InvalidChecksum(String),

    #[error("Invalid checksum length: expected 32 bytes, got {0}")]
    InvalidChecksumLength(usize),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Chunk index {index} out of range (total chunks: {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("File too large to chunk: {size} bytes in chunks of {chunk_size}")]
    TooManyChunks { size: u64, chunk_size: u64 },

    #[error("Source changed while reading: expected {expected} bytes, read {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("Integrity error: {0}")]
    Integrity(#[from] crate::integrity::IntegrityError),

    #[error("Invalid upload id: {0:?}")]
    InvalidUploadId(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),
}

pub type Result<T> = std::result::Result<T, ChunkError>;

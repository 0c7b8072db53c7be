use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt chunk record for {upload_id}/{index}: {reason}")]
    CorruptRecord {
        upload_id: String,
        index: u32,
        reason: String,
    },

    #[error("Chunk {index} of {upload_id} not found")]
    ChunkNotFound { upload_id: String, index: u32 },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

use bytes::Bytes;

use crate::chunk::{Chunk, FileManifest};

pub use crate::server::ResumeState;

/// Everything needed to send one chunk.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_size: Option<u64>,
    /// Hex BLAKE3 of `data`.
    pub checksum: String,
    pub data: Bytes,
}

impl ChunkUpload {
    pub fn new(manifest: &FileManifest, chunk: Chunk) -> Self {
        Self {
            upload_id: manifest.upload_id.clone(),
            index: chunk.metadata.index,
            total_chunks: manifest.total_chunks,
            file_name: manifest.file_name.clone(),
            file_type: manifest.file_type.clone(),
            file_size: manifest.total_size,
            chunk_size: Some(manifest.chunk_size),
            checksum: chunk.metadata.checksum,
            data: chunk.data,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::error::{ChunkError, Result};

/// Default bytes per chunk: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Longest upload id the server accepts.
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// One contiguous byte range of a file, identified by its 0-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

impl ChunkSpan {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub offset: u64,
    pub size: u64,
    pub checksum: String, // hex BLAKE3
}

/// Chunk bytes plus everything the server needs to store and later verify them.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub metadata: ChunkMetadata,
    pub data: Bytes,
}

/// Immutable description of a file being uploaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileManifest {
    pub upload_id: String,
    pub file_name: String,
    pub file_type: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Derive a stable upload id from the file identity and a client nonce.
///
/// The same triple always maps to the same id, so a client that persists its nonce
/// can resume an interrupted upload after a restart.
pub fn derive_upload_id(file_name: &str, total_size: u64, nonce: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_name.as_bytes());
    hasher.update(&[0]);
    hasher.update(&total_size.to_le_bytes());
    hasher.update(&[0]);
    hasher.update(nonce.as_bytes());
    let digest = hex::encode(hasher.finalize().as_bytes());
    digest[..32].to_string()
}

pub fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Upload ids are opaque to the server but become directory names, so they must be a
/// single path component.
pub fn validate_upload_id(upload_id: &str) -> Result<()> {
    let invalid = upload_id.is_empty()
        || upload_id.len() > MAX_UPLOAD_ID_LEN
        || upload_id == "."
        || upload_id == ".."
        || upload_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        return Err(ChunkError::InvalidUploadId(upload_id.to_string()));
    }
    Ok(())
}

/// Reduce a client supplied file name to a safe single path component.
pub fn sanitize_file_name(file_name: &str) -> Result<String> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(ChunkError::InvalidFileName(file_name.to_string()));
    }
    if base.bytes().any(|b| b.is_ascii_control()) {
        return Err(ChunkError::InvalidFileName(file_name.to_string()));
    }
    Ok(base.to_string())
}

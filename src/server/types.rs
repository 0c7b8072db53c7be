use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::session::UploadStatus;

/// One chunk as received from a client, before validation.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    /// Declared chunk size; enables exact length checks when present.
    pub chunk_size: Option<u64>,
    /// Hex BLAKE3 of `data` as computed by the client.
    pub checksum: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub upload_id: String,
    pub index: u32,
    pub size: u64,
    pub checksum: String,
    /// False when the session was already completed and the chunk was ignored.
    pub stored: bool,
}

/// What the server already holds for an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    pub uploaded: BTreeSet<u32>,
    /// `None` when the server has no session for the id.
    pub status: Option<UploadStatus>,
    /// Set once the upload is completed.
    pub url: Option<String>,
}

impl ResumeState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_completed(&self) -> bool {
        self.status == Some(UploadStatus::Completed) && self.url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignGrant {
    pub upload_id: String,
    pub url: String,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    pub sessions_removed: usize,
    pub chunks_removed: usize,
    pub tickets_purged: usize,
}

use serde::{Deserialize, Serialize};

use crate::session::{UploadSession, UploadStatus};

/// Multipart field names of `POST /chunk`.
pub mod fields {
    pub const CHUNK: &str = "chunk";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const FILE_NAME: &str = "fileName";
    pub const FILE_ID: &str = "fileId";
    pub const FILE_SIZE: &str = "fileSize";
    pub const FILE_TYPE: &str = "fileType";
    pub const CHUNK_SIZE: &str = "chunkSize";
    pub const CHECKSUM: &str = "checksum";
}

/// Error code of an incomplete-session response.
pub const INCOMPLETE_SESSION_CODE: &str = "INCOMPLETE_SESSION";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub file_id: String,
    pub chunk_index: u32,
    pub size: u64,
    pub checksum: String,
    pub stored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckChunksRequest {
    pub file_id: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckChunksResponse {
    pub uploaded_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequestBody {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    /// Hex BLAKE3 of the whole file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub file_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub url: String,
    pub file_id: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresignedQuery {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPresignedRequest {
    pub file_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_size: Option<u64>,
    pub total_chunks: u32,
    pub status: UploadStatus,
    pub url: Option<String>,
    pub checksum: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<UploadSession> for SessionResponse {
    fn from(session: UploadSession) -> Self {
        Self {
            file_id: session.upload_id,
            file_name: session.file_name,
            file_type: session.file_type,
            file_size: session.total_size,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            status: session.status,
            url: session.final_url,
            checksum: session.checksum,
            error: session.error,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub file_id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_chunks: Option<Vec<u32>>,
}

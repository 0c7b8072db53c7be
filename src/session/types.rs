use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chunk::FileManifest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Merging => "merging",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }

    /// Sessions that still expect chunks and are reclaimed when abandoned.
    pub fn is_open(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploading)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "merging" => Ok(UploadStatus::Merging),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            "cancelled" => Ok(UploadStatus::Cancelled),
            other => Err(format!("unknown upload status: {other}")),
        }
    }
}

/// Server-owned record of one file's upload attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub file_name: String,
    pub file_type: String,
    pub total_size: u64,
    /// `None` when the client never declared it.
    pub chunk_size: Option<u64>,
    pub total_chunks: u32,
    pub status: UploadStatus,
    pub final_url: Option<String>,
    pub checksum: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UploadSession {
    pub fn new(
        upload_id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        total_size: u64,
        chunk_size: Option<u64>,
        total_chunks: u32,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            upload_id: upload_id.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            total_size,
            chunk_size,
            total_chunks,
            status: UploadStatus::Pending,
            final_url: None,
            checksum: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_manifest(manifest: &FileManifest) -> Self {
        Self::new(
            manifest.upload_id.clone(),
            manifest.file_name.clone(),
            manifest.file_type.clone(),
            manifest.total_size,
            Some(manifest.chunk_size),
            manifest.total_chunks,
        )
    }

    /// Indices in `[0, total_chunks)` missing from `present`.
    pub fn missing_chunks<'a>(&self, present: impl IntoIterator<Item = &'a u32>) -> Vec<u32> {
        let present: std::collections::HashSet<u32> = present.into_iter().copied().collect();
        (0..self.total_chunks)
            .filter(|i| !present.contains(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Merging,
            UploadStatus::Completed,
            UploadStatus::Failed,
            UploadStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_missing_chunks() {
        let session = UploadSession::new("u", "f.bin", "application/octet-stream", 10, Some(4), 3);
        assert_eq!(session.missing_chunks(&[0, 2]), vec![1]);
        assert!(session.missing_chunks(&[0, 1, 2]).is_empty());
        assert_eq!(session.missing_chunks(&[]), vec![0, 1, 2]);
    }
}

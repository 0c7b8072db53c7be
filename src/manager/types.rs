use serde::{Deserialize, Serialize};

use crate::coordinator::UploadState;

/// Snapshot of one file in an [`UploadManager`](super::UploadManager).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub state: UploadState,
    pub percent: u8,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl FileStatus {
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

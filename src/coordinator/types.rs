use serde::{Deserialize, Serialize};

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::transport::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum UploadState {
    Idle,
    Resolving,
    Transferring,
    Merging,
    Completed { url: String },
    Failed { error: String },
    Cancelled,
}

impl UploadState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UploadState::Resolving | UploadState::Transferring | UploadState::Merging
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed { .. } | UploadState::Failed { .. } | UploadState::Cancelled
        )
    }

    /// States a user may restart from.
    pub fn can_restart(&self) -> bool {
        matches!(self, UploadState::Failed { .. } | UploadState::Cancelled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Resolving => "resolving",
            UploadState::Transferring => "transferring",
            UploadState::Merging => "merging",
            UploadState::Completed { .. } => "completed",
            UploadState::Failed { .. } => "failed",
            UploadState::Cancelled => "cancelled",
        }
    }
}

/// Inputs to [`UploadStateMachine::transition`](super::UploadStateMachine::transition).
#[derive(Debug, Clone)]
pub enum StateEvent {
    Start,
    Restart,
    Resolved,
    AllChunksSent,
    MergeSucceeded { url: String },
    Fail { error: String },
    Cancel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Sending,
    Sent,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub index: u32,
    pub size: u64,
    pub bytes_sent: u64,
    pub status: ChunkStatus,
}

/// How the file-level percentage is computed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// `completed_chunks / total_chunks`
    #[default]
    Chunks,
    /// `bytes_sent / total_size`
    Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub percent: u8,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub chunks: Vec<ChunkProgress>,
}

/// Notifications for whoever renders the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    StateChanged { upload_id: String, state: UploadState },
    Progress { upload_id: String, percent: u8 },
    ChunkComplete {
        upload_id: String,
        index: u32,
        total: u32,
        /// The server already had it.
        skipped: bool,
    },
    Success { upload_id: String, url: String },
    Error { upload_id: String, message: String },
    Cancelled { upload_id: String },
}

impl UploadEvent {
    pub fn upload_id(&self) -> &str {
        match self {
            UploadEvent::StateChanged { upload_id, .. }
            | UploadEvent::Progress { upload_id, .. }
            | UploadEvent::ChunkComplete { upload_id, .. }
            | UploadEvent::Success { upload_id, .. }
            | UploadEvent::Error { upload_id, .. }
            | UploadEvent::Cancelled { upload_id } => upload_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed { url: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub chunk_size: u64,
    /// Chunk sends in flight per file.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub progress_mode: ProgressMode,
    /// Send a whole-file checksum with the merge request.
    pub verify_whole_file: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 1,
            retry: RetryPolicy::default(),
            progress_mode: ProgressMode::Chunks,
            verify_whole_file: true,
        }
    }
}

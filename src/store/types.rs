use serde::{Deserialize, Serialize};

/// Server-side record of one durably stored chunk.
///
/// At most one record exists per `(upload_id, index)`; storing the same index again
/// replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub upload_id: String,
    pub index: u32,
    pub size: u64,
    pub checksum: String,
    pub received_at: i64,
}

impl ChunkRecord {
    pub fn new(upload_id: &str, index: u32, size: u64, checksum: String) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            index,
            size,
            checksum,
            received_at: chrono::Utc::now().timestamp(),
        }
    }
}

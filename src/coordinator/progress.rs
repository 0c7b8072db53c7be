use crate::chunk::ChunkPlan;
use crate::coordinator::types::{ChunkProgress, ChunkStatus, ProgressMode, UploadProgress};

/// Per-chunk status plus the file-level percentage.
///
/// The reported percentage never decreases, even when a restart finds that the
/// server lost chunks it had already acknowledged, and only reaches 100 once every
/// chunk is sent.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    mode: ProgressMode,
    total_bytes: u64,
    chunks: Vec<ChunkProgress>,
    percent: u8,
}

impl ProgressTracker {
    pub fn new(plan: &ChunkPlan, mode: ProgressMode) -> Self {
        let chunks = plan
            .spans()
            .map(|span| ChunkProgress {
                index: span.index,
                size: span.len,
                bytes_sent: 0,
                status: ChunkStatus::Pending,
            })
            .collect();

        Self {
            mode,
            total_bytes: plan.total_size(),
            chunks,
            percent: 0,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn completed_chunks(&self) -> u32 {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Sent)
            .count() as u32
    }

    pub fn bytes_sent(&self) -> u64 {
        self.chunks.iter().map(|c| c.bytes_sent).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.status == ChunkStatus::Sent)
    }

    pub fn status(&self, index: u32) -> Option<ChunkStatus> {
        self.chunks.get(index as usize).map(|c| c.status)
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn mark_sending(&mut self, index: u32) {
        if let Some(chunk) = self.chunks.get_mut(index as usize) {
            chunk.status = ChunkStatus::Sending;
        }
    }

    /// Record a chunk as stored on the server and return the updated percentage.
    pub fn mark_sent(&mut self, index: u32) -> u8 {
        if let Some(chunk) = self.chunks.get_mut(index as usize) {
            chunk.status = ChunkStatus::Sent;
            chunk.bytes_sent = chunk.size;
        }
        self.recompute()
    }

    pub fn mark_error(&mut self, index: u32) {
        if let Some(chunk) = self.chunks.get_mut(index as usize) {
            if chunk.status != ChunkStatus::Sent {
                chunk.status = ChunkStatus::Error;
                chunk.bytes_sent = 0;
            }
        }
    }

    /// Chunks the server no longer holds go back to pending. The percentage is kept.
    pub fn reset_unsent(&mut self, keep: impl Fn(u32) -> bool) {
        for chunk in &mut self.chunks {
            if !keep(chunk.index) {
                chunk.status = ChunkStatus::Pending;
                chunk.bytes_sent = 0;
            }
        }
    }

    pub fn snapshot(&self, upload_id: &str) -> UploadProgress {
        UploadProgress {
            upload_id: upload_id.to_string(),
            percent: self.percent,
            completed_chunks: self.completed_chunks(),
            total_chunks: self.total_chunks(),
            bytes_sent: self.bytes_sent(),
            total_bytes: self.total_bytes,
            chunks: self.chunks.clone(),
        }
    }

    fn recompute(&mut self) -> u8 {
        let raw = match self.mode {
            ProgressMode::Bytes if self.total_bytes > 0 => {
                rounded_percent(self.bytes_sent(), self.total_bytes)
            }
            _ => rounded_percent(self.completed_chunks() as u64, self.total_chunks() as u64),
        };
        let raw = if self.is_complete() { 100 } else { raw.min(99) };

        self.percent = self.percent.max(raw);
        self.percent
    }
}

fn rounded_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done as u128;
    let total = total as u128;
    ((done * 100 + total / 2) / total).min(100) as u8
}

use std::sync::Arc;
use tracing::{debug, info};

use super::error::{TransportError, TransportResult};
use super::types::ResumeState;
use super::UploadTransport;

/// Works out which chunks can be skipped before a transfer starts.
pub struct ResumeResolver {
    transport: Arc<dyn UploadTransport>,
}

impl ResumeResolver {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self { transport }
    }

    /// Indices already stored for `upload_id`.
    ///
    /// A session the server has never seen is not an error, it just has nothing to
    /// resume. Indices outside `[0, total_chunks)` are dropped.
    pub async fn resolve(&self, upload_id: &str, total_chunks: u32) -> TransportResult<ResumeState> {
        let mut state = match self.transport.check_chunks(upload_id, total_chunks).await {
            Ok(state) => state,
            Err(TransportError::UnknownSession(_)) => {
                debug!(upload_id, "no server session, starting fresh");
                ResumeState::empty()
            }
            Err(e) => return Err(e),
        };

        state.uploaded.retain(|index| *index < total_chunks);
        if !state.uploaded.is_empty() {
            info!(
                upload_id,
                stored = state.uploaded.len(),
                total_chunks,
                "resuming upload"
            );
        }
        Ok(state)
    }
}

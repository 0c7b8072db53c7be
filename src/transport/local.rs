use async_trait::async_trait;
use std::sync::Arc;

use super::error::{TransportError, TransportResult};
use super::types::{ChunkUpload, ResumeState};
use super::UploadTransport;
use crate::assembler::MergeRequest;
use crate::server::{ChunkSubmission, ServiceError, UploadService};

/// Transport that calls an [`UploadService`] in the same process.
///
/// Errors are classified the same way the HTTP layer classifies them, so the
/// coordinator behaves identically against either transport.
#[derive(Clone)]
pub struct LocalTransport {
    service: Arc<UploadService>,
}

impl LocalTransport {
    pub fn new(service: Arc<UploadService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<UploadService> {
        &self.service
    }
}

impl From<ServiceError> for TransportError {
    fn from(err: ServiceError) -> Self {
        let status = err.status();
        match err {
            ServiceError::Incomplete { missing, .. } => TransportError::Incomplete {
                message: format!("missing chunks {missing:?}"),
                missing,
            },
            ServiceError::UnknownSession(id) => TransportError::UnknownSession(id),
            e if TransportError::is_retriable_status(status) => TransportError::Server {
                status,
                message: e.to_string(),
            },
            e => TransportError::Rejected {
                status,
                code: Some(e.code().to_string()),
                message: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl UploadTransport for LocalTransport {
    async fn send_chunk(&self, chunk: &ChunkUpload) -> TransportResult<()> {
        self.service
            .accept_chunk(ChunkSubmission {
                upload_id: chunk.upload_id.clone(),
                index: chunk.index,
                total_chunks: chunk.total_chunks,
                file_name: chunk.file_name.clone(),
                file_type: chunk.file_type.clone(),
                file_size: chunk.file_size,
                chunk_size: chunk.chunk_size,
                checksum: Some(chunk.checksum.clone()),
                data: chunk.data.clone(),
            })
            .await?;
        Ok(())
    }

    async fn check_chunks(&self, upload_id: &str, total_chunks: u32) -> TransportResult<ResumeState> {
        Ok(self.service.check_chunks(upload_id, total_chunks).await?)
    }

    async fn merge(&self, request: &MergeRequest) -> TransportResult<String> {
        Ok(self.service.merge(request.clone()).await?.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ServiceError) -> Option<u16> {
        match TransportError::from(err) {
            TransportError::Rejected { status, .. } | TransportError::Server { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }

    #[test]
    fn test_errors_carry_http_status() {
        assert_eq!(status_of(ServiceError::Validation("bad".into())), Some(400));
        assert_eq!(status_of(ServiceError::PresignDenied("expired".into())), Some(403));
        assert_eq!(status_of(ServiceError::Conflict("cancelled".into())), Some(409));
        assert_eq!(status_of(ServiceError::TooLarge("big".into())), Some(413));
        assert_eq!(status_of(ServiceError::UnsupportedType("x/y".into())), Some(415));
        assert_eq!(status_of(ServiceError::Integrity("size".into())), Some(422));

        let io = ServiceError::Io(std::io::Error::other("disk"));
        assert!(TransportError::from(io).is_retriable());
    }

    #[test]
    fn test_conflict_keeps_code_and_is_final() {
        let err = TransportError::from(ServiceError::Conflict("upload u1 was cancelled".into()));
        assert!(!err.is_retriable());
        assert!(matches!(
            err,
            TransportError::Rejected { status: 409, code: Some(ref c), .. } if c == "CONFLICT"
        ));
        assert!(matches!(
            TransportError::from(ServiceError::Incomplete {
                upload_id: "u1".into(),
                missing: vec![2],
            }),
            TransportError::Incomplete { ref missing, .. } if missing == &vec![2]
        ));
    }
}

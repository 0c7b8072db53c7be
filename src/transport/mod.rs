//! Client side of the upload protocol.
//!
//! [`UploadTransport`] is the seam between the coordinator and the server: the HTTP
//! implementation talks to a remote server, the local one calls an in-process
//! [`UploadService`](crate::server::UploadService).

pub mod error;
pub mod http;
pub mod local;
pub mod resolver;
pub mod retry;
pub mod types;

use async_trait::async_trait;

use crate::assembler::MergeRequest;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use resolver::ResumeResolver;
pub use retry::RetryPolicy;
pub use types::{ChunkUpload, ResumeState};

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Send one chunk; success means the server stored it durably.
    async fn send_chunk(&self, chunk: &ChunkUpload) -> TransportResult<()>;

    /// Ask which chunk indices the server already holds.
    async fn check_chunks(&self, upload_id: &str, total_chunks: u32) -> TransportResult<ResumeState>;

    /// Request assembly, returning the URL of the published object.
    async fn merge(&self, request: &MergeRequest) -> TransportResult<String>;
}

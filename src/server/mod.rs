//! Server half of the upload protocol: chunk intake, resume queries, merge,
//! presigned uploads and session expiry.

pub mod error;
pub mod presign;
pub mod service;
pub mod types;

pub use error::{ServiceError, ServiceResult};
pub use presign::{PresignRegistry, PresignTicket};
pub use service::UploadService;
pub use types::{ChunkReceipt, ChunkSubmission, GcReport, PresignGrant, ResumeState};

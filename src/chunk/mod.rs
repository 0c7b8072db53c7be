pub mod chunker;
pub mod error;
pub mod types;

pub use chunker::{ChunkPlan, ChunkSpans, Chunker};
pub use error::{ChunkError, Result};
pub use types::{
    derive_upload_id, new_nonce, sanitize_file_name, validate_upload_id, Chunk, ChunkMetadata,
    ChunkSpan, FileManifest, DEFAULT_CHUNK_SIZE,
};

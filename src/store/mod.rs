//! Chunk storage keyed by `(upload_id, index)`.
//!
//! Arrival order never matters: the assembler reads chunks back by index.

pub mod disk;
pub mod error;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;

pub use disk::DiskChunkStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryChunkStore;
pub use types::ChunkRecord;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Durably store (or overwrite) chunk `index` of `upload_id`.
    async fn put(
        &self,
        upload_id: &str,
        index: u32,
        data: Bytes,
        checksum: String,
    ) -> StoreResult<ChunkRecord>;

    /// Read a stored chunk back with its record.
    async fn read(&self, upload_id: &str, index: u32) -> StoreResult<Option<(ChunkRecord, Bytes)>>;

    /// Indices currently stored for `upload_id`. Unknown uploads yield an empty set.
    async fn list_indices(&self, upload_id: &str) -> StoreResult<BTreeSet<u32>>;

    /// Drop every chunk of `upload_id`, returning how many were removed.
    async fn delete(&self, upload_id: &str) -> StoreResult<usize>;
}

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};

use super::error::StoreResult;
use super::types::ChunkRecord;
use super::ChunkStore;

#[derive(Debug, Clone)]
struct StoredChunk {
    record: ChunkRecord,
    data: Bytes,
}

/// In-process chunk store, used by tests and single-node deployments without a data dir.
#[derive(Default)]
pub struct MemoryChunkStore {
    uploads: DashMap<String, BTreeMap<u32, StoredChunk>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(
        &self,
        upload_id: &str,
        index: u32,
        data: Bytes,
        checksum: String,
    ) -> StoreResult<ChunkRecord> {
        let record = ChunkRecord::new(upload_id, index, data.len() as u64, checksum);
        self.uploads
            .entry(upload_id.to_string())
            .or_default()
            .insert(
                index,
                StoredChunk {
                    record: record.clone(),
                    data,
                },
            );
        Ok(record)
    }

    async fn read(&self, upload_id: &str, index: u32) -> StoreResult<Option<(ChunkRecord, Bytes)>> {
        Ok(self.uploads.get(upload_id).and_then(|chunks| {
            chunks
                .get(&index)
                .map(|c| (c.record.clone(), c.data.clone()))
        }))
    }

    async fn list_indices(&self, upload_id: &str) -> StoreResult<BTreeSet<u32>> {
        Ok(self
            .uploads
            .get(upload_id)
            .map(|chunks| chunks.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, upload_id: &str) -> StoreResult<usize> {
        Ok(self
            .uploads
            .remove(upload_id)
            .map(|(_, chunks)| chunks.len())
            .unwrap_or(0))
    }
}

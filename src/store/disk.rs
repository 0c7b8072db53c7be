use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::types::ChunkRecord;
use super::ChunkStore;
use crate::chunk::validate_upload_id;

const PART_EXT: &str = "part";
const RECORD_EXT: &str = "json";

/// Chunk store on the local filesystem.
///
/// Layout: `<base>/<upload_id>/<index>.part` with a `<index>.json` record beside it.
/// Both are written to a temp name and renamed into place, and the record is written
/// last, so an index is only listed once its bytes are durable.
pub struct DiskChunkStore {
    base_path: PathBuf,
}

impl DiskChunkStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn upload_dir(&self, upload_id: &str) -> StoreResult<PathBuf> {
        validate_upload_id(upload_id).map_err(|e| {
            StoreError::Io(std::io::Error::new(ErrorKind::InvalidInput, e.to_string()))
        })?;
        Ok(self.base_path.join(upload_id))
    }

    fn part_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("{index:010}.{PART_EXT}"))
    }

    fn record_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("{index:010}.{RECORD_EXT}"))
    }

    async fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> StoreResult<()> {
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let write = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&tmp_path, target).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn load_record(dir: &Path, upload_id: &str, index: u32) -> StoreResult<Option<ChunkRecord>> {
        let raw = match fs::read(Self::record_path(dir, index)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: ChunkRecord =
            serde_json::from_slice(&raw).map_err(|e| StoreError::CorruptRecord {
                upload_id: upload_id.to_string(),
                index,
                reason: e.to_string(),
            })?;
        Ok(Some(record))
    }
}

#[async_trait]
impl ChunkStore for DiskChunkStore {
    async fn put(
        &self,
        upload_id: &str,
        index: u32,
        data: Bytes,
        checksum: String,
    ) -> StoreResult<ChunkRecord> {
        let dir = self.upload_dir(upload_id)?;
        fs::create_dir_all(&dir).await?;

        let record = ChunkRecord::new(upload_id, index, data.len() as u64, checksum);
        Self::write_atomic(&dir, &Self::part_path(&dir, index), &data).await?;
        let encoded = serde_json::to_vec(&record)?;
        Self::write_atomic(&dir, &Self::record_path(&dir, index), &encoded).await?;

        debug!(upload_id, index, size = record.size, "chunk written to disk");
        Ok(record)
    }

    async fn read(&self, upload_id: &str, index: u32) -> StoreResult<Option<(ChunkRecord, Bytes)>> {
        let dir = self.upload_dir(upload_id)?;
        let Some(record) = Self::load_record(&dir, upload_id, index).await? else {
            return Ok(None);
        };

        let data = match fs::read(Self::part_path(&dir, index)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::ChunkNotFound {
                    upload_id: upload_id.to_string(),
                    index,
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some((record, Bytes::from(data))))
    }

    async fn list_indices(&self, upload_id: &str) -> StoreResult<BTreeSet<u32>> {
        let dir = self.upload_dir(upload_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(index) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            else {
                warn!(upload_id, path = %path.display(), "ignoring unexpected file in chunk dir");
                continue;
            };
            if fs::try_exists(Self::part_path(&dir, index)).await? {
                indices.insert(index);
            }
        }
        Ok(indices)
    }

    async fn delete(&self, upload_id: &str) -> StoreResult<usize> {
        let removed = self.list_indices(upload_id).await?.len();
        let dir = self.upload_dir(upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

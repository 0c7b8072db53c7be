use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::{ChunkError, Result};
use super::types::{Chunk, ChunkMetadata, ChunkSpan, FileManifest};
use crate::integrity::IntegrityVerifier;

/// Partition of `[0, total_size)` into fixed-size spans.
///
/// A zero-byte file still has one (empty) chunk 0 so the protocol has something to
/// merge; a chunk size larger than the file yields a single chunk of `total_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize(
                "chunk size must be greater than zero".into(),
            ));
        }

        let total_chunks = Self::count_chunks(total_size, chunk_size);
        let total_chunks = u32::try_from(total_chunks).map_err(|_| ChunkError::TooManyChunks {
            size: total_size,
            chunk_size,
        })?;

        Ok(Self {
            total_size,
            chunk_size,
            total_chunks,
        })
    }

    /// `max(1, ceil(total_size / chunk_size))`
    pub fn count_chunks(total_size: u64, chunk_size: u64) -> u64 {
        if chunk_size == 0 {
            return 0;
        }
        total_size.div_ceil(chunk_size).max(1)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, or `None` past the end.
    pub fn span(&self, index: u32) -> Option<ChunkSpan> {
        if index >= self.total_chunks {
            return None;
        }
        let offset = index as u64 * self.chunk_size;
        let len = self.chunk_size.min(self.total_size - offset);
        Some(ChunkSpan { index, offset, len })
    }

    /// Expected length of chunk `index`.
    pub fn expected_len(&self, index: u32) -> Option<u64> {
        self.span(index).map(|s| s.len)
    }

    /// Lazy iterator over all spans. Each call starts again at chunk 0.
    pub fn spans(&self) -> ChunkSpans {
        ChunkSpans {
            plan: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &ChunkPlan {
    type Item = ChunkSpan;
    type IntoIter = ChunkSpans;

    fn into_iter(self) -> ChunkSpans {
        self.spans()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkSpans {
    plan: ChunkPlan,
    next: u32,
}

impl Iterator for ChunkSpans {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        let span = self.plan.span(self.next)?;
        self.next += 1;
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.total_chunks.saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkSpans {}

#[derive(Debug, Clone)]
enum ChunkSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// Reads chunk bytes from a file (or an in-memory buffer) on demand.
///
/// Every read opens its own handle, so several chunks can be read concurrently.
#[derive(Debug, Clone)]
pub struct Chunker {
    source: ChunkSource,
    plan: ChunkPlan,
}

impl Chunker {
    pub async fn open(path: impl AsRef<Path>, chunk_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let total_size = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            source: ChunkSource::Path(path),
            plan: ChunkPlan::new(total_size, chunk_size)?,
        })
    }

    pub fn from_bytes(data: impl Into<Bytes>, chunk_size: u64) -> Result<Self> {
        let data = data.into();
        Ok(Self {
            plan: ChunkPlan::new(data.len() as u64, chunk_size)?,
            source: ChunkSource::Memory(data),
        })
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ChunkSource::Path(p) => Some(p),
            ChunkSource::Memory(_) => None,
        }
    }

    pub fn manifest(&self, upload_id: &str, file_name: &str, file_type: &str) -> FileManifest {
        FileManifest {
            upload_id: upload_id.to_string(),
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            total_size: self.plan.total_size(),
            chunk_size: self.plan.chunk_size(),
            total_chunks: self.plan.total_chunks(),
        }
    }

    /// Read the raw bytes of chunk `index`.
    pub async fn read_span(&self, index: u32) -> Result<(ChunkSpan, Bytes)> {
        let span = self.plan.span(index).ok_or(ChunkError::IndexOutOfRange {
            index,
            total: self.plan.total_chunks(),
        })?;

        let data = match &self.source {
            ChunkSource::Memory(bytes) => bytes.slice(span.offset as usize..span.range().end as usize),
            ChunkSource::Path(path) => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(span.offset)).await?;

                let mut buf = Vec::with_capacity(span.len as usize);
                let read = (&mut file).take(span.len).read_to_end(&mut buf).await?;
                if read as u64 != span.len {
                    return Err(ChunkError::ShortRead {
                        expected: span.len,
                        actual: read as u64,
                    });
                }
                Bytes::from(buf)
            }
        };

        Ok((span, data))
    }

    /// Read chunk `index` and compute its checksum.
    pub async fn read_chunk(&self, upload_id: &str, index: u32) -> Result<Chunk> {
        let (span, data) = self.read_span(index).await?;
        let checksum = IntegrityVerifier::checksum_hex(&data);

        Ok(Chunk {
            metadata: ChunkMetadata {
                upload_id: upload_id.to_string(),
                index,
                total_chunks: self.plan.total_chunks(),
                offset: span.offset,
                size: span.len,
                checksum,
            },
            data,
        })
    }

    /// BLAKE3 of the whole source, streamed.
    pub async fn file_checksum(&self) -> Result<String> {
        match &self.source {
            ChunkSource::Memory(bytes) => Ok(IntegrityVerifier::checksum_hex(bytes)),
            ChunkSource::Path(path) => {
                let digest = IntegrityVerifier::calculate_file_checksum(path).await?;
                Ok(hex::encode(digest))
            }
        }
    }
}

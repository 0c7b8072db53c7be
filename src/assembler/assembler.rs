use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::error::{AssemblyError, AssemblyResult};
use super::publisher::ObjectPublisher;
use crate::integrity::IntegrityVerifier;
use crate::metrics::recorder::{record_merge_complete, record_merge_failed};
use crate::session::{SessionLocks, SessionStore, UploadSession, UploadStatus};
use crate::store::ChunkStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub upload_id: String,
    pub file_name: String,
    pub file_type: String,
    /// Hex BLAKE3 of the whole file, checked when present.
    pub expected_checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub url: String,
    pub checksum: String,
    pub size: u64,
    /// The session was already completed and nothing was assembled.
    pub already_completed: bool,
}

/// Concatenates stored chunks into the published object.
pub struct Assembler {
    chunks: Arc<dyn ChunkStore>,
    sessions: Arc<SessionStore>,
    publisher: ObjectPublisher,
    locks: Arc<SessionLocks>,
}

impl Assembler {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        sessions: Arc<SessionStore>,
        publisher: ObjectPublisher,
        locks: Arc<SessionLocks>,
    ) -> Self {
        Self {
            chunks,
            sessions,
            publisher,
            locks,
        }
    }

    pub fn publisher(&self) -> &ObjectPublisher {
        &self.publisher
    }

    /// Assemble and publish `upload_id`.
    ///
    /// Holds the session's exclusive lock for the whole operation, so concurrent merges
    /// of one session run one after another and the later ones see `completed`.
    pub async fn merge(&self, request: &MergeRequest) -> AssemblyResult<MergeOutcome> {
        let _guard = self.locks.exclusive(&request.upload_id).await;

        let session = self
            .sessions
            .load(&request.upload_id)
            .await?
            .ok_or_else(|| AssemblyError::UnknownSession(request.upload_id.clone()))?;

        match session.status {
            UploadStatus::Completed => {
                if let Some(url) = session.final_url.clone() {
                    info!(upload_id = %session.upload_id, "merge repeated on completed upload");
                    return Ok(MergeOutcome {
                        url,
                        checksum: session.checksum.clone().unwrap_or_default(),
                        size: session.total_size,
                        already_completed: true,
                    });
                }
            }
            UploadStatus::Cancelled => {
                return Err(AssemblyError::Cancelled(session.upload_id.clone()));
            }
            _ => {}
        }

        let present = self.chunks.list_indices(&session.upload_id).await?;
        let missing = session.missing_chunks(&present);
        if !missing.is_empty() {
            self.sessions
                .update_status(&session.upload_id, UploadStatus::Uploading, None)
                .await?;
            record_merge_failed("incomplete");
            warn!(
                upload_id = %session.upload_id,
                missing = missing.len(),
                "merge requested with missing chunks"
            );
            return Err(AssemblyError::Incomplete {
                upload_id: session.upload_id.clone(),
                missing,
            });
        }

        self.sessions
            .update_status(&session.upload_id, UploadStatus::Merging, None)
            .await?;

        let started = Instant::now();
        match self.assemble_and_publish(&session, request).await {
            Ok(outcome) => {
                record_merge_complete(started.elapsed(), outcome.size);
                info!(
                    upload_id = %session.upload_id,
                    size = outcome.size,
                    url = %outcome.url,
                    "upload merged"
                );
                Ok(outcome)
            }
            Err(err) => {
                record_merge_failed(err.reason());
                warn!(upload_id = %session.upload_id, error = %err, "merge failed");
                if err.is_data_error() {
                    // The stored bytes can never produce a valid object; drop them so
                    // a retry resends everything.
                    self.sessions
                        .update_status(
                            &session.upload_id,
                            UploadStatus::Failed,
                            Some(err.to_string()),
                        )
                        .await?;
                    if let Err(e) = self.chunks.delete(&session.upload_id).await {
                        warn!(upload_id = %session.upload_id, error = %e, "failed to discard chunks");
                    }
                } else {
                    self.sessions
                        .update_status(
                            &session.upload_id,
                            UploadStatus::Uploading,
                            Some(err.to_string()),
                        )
                        .await?;
                }
                Err(err)
            }
        }
    }

    async fn assemble_and_publish(
        &self,
        session: &UploadSession,
        request: &MergeRequest,
    ) -> AssemblyResult<MergeOutcome> {
        let staged = self.publisher.staging_path();
        let (checksum, size) = match self.write_staged(session, &staged).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&staged).await;
                return Err(err);
            }
        };

        let verified = if size != session.total_size {
            Err(AssemblyError::SizeMismatch {
                expected: session.total_size,
                actual: size,
            })
        } else {
            match &request.expected_checksum {
                Some(expected) if !IntegrityVerifier::checksums_match(expected, &checksum) => {
                    Err(AssemblyError::ChecksumMismatch {
                        expected: expected.clone(),
                        actual: checksum.clone(),
                    })
                }
                _ => Ok(()),
            }
        };
        if let Err(err) = verified {
            let _ = fs::remove_file(&staged).await;
            return Err(err);
        }

        let url = match self
            .publisher
            .publish(&staged, &session.upload_id, &session.file_name)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                let _ = fs::remove_file(&staged).await;
                return Err(err.into());
            }
        };

        self.sessions
            .complete(&session.upload_id, &url, &checksum)
            .await?;

        match self.chunks.delete(&session.upload_id).await {
            Ok(removed) => info!(upload_id = %session.upload_id, removed, "chunk storage reclaimed"),
            Err(e) => warn!(upload_id = %session.upload_id, error = %e, "failed to reclaim chunks"),
        }

        Ok(MergeOutcome {
            url,
            checksum,
            size,
            already_completed: false,
        })
    }

    /// Stream chunks in index order into `staged`, returning the whole-file checksum and size.
    async fn write_staged(
        &self,
        session: &UploadSession,
        staged: &Path,
    ) -> AssemblyResult<(String, u64)> {
        let mut file = File::create(staged).await?;
        let mut hasher = blake3::Hasher::new();
        let mut size = 0u64;

        for index in 0..session.total_chunks {
            let (record, data) = self
                .chunks
                .read(&session.upload_id, index)
                .await?
                .ok_or_else(|| AssemblyError::Incomplete {
                    upload_id: session.upload_id.clone(),
                    missing: vec![index],
                })?;

            if record.size != data.len() as u64 {
                return Err(AssemblyError::ChunkCorrupted {
                    index,
                    reason: format!("recorded {} bytes, read {}", record.size, data.len()),
                });
            }
            IntegrityVerifier::verify_bytes(&data, &record.checksum).map_err(|e| {
                AssemblyError::ChunkCorrupted {
                    index,
                    reason: e.to_string(),
                }
            })?;

            hasher.update(&data);
            file.write_all(&data).await?;
            size += data.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok((hasher.finalize().to_hex().to_string(), size))
    }
}

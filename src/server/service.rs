use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{ServiceError, ServiceResult};
use super::presign::PresignRegistry;
use super::types::{ChunkReceipt, ChunkSubmission, GcReport, PresignGrant, ResumeState};
use crate::assembler::{Assembler, MergeOutcome, MergeRequest, ObjectPublisher};
use crate::chunk::{derive_upload_id, new_nonce, sanitize_file_name, validate_upload_id, ChunkPlan};
use crate::config::ServerConfig;
use crate::integrity::{IntegrityError, IntegrityVerifier};
use crate::metrics::recorder::{record_chunk_rejected, record_chunk_stored, record_sessions_expired};
use crate::session::{SessionLocks, SessionStore, UploadSession, UploadStatus};
use crate::store::{ChunkStore, DiskChunkStore, MemoryChunkStore};

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// Server half of the upload protocol.
///
/// Owns the chunk store, the session records and the assembler, and serializes
/// access per upload id through [`SessionLocks`].
pub struct UploadService {
    config: ServerConfig,
    chunks: Arc<dyn ChunkStore>,
    sessions: Arc<SessionStore>,
    locks: Arc<SessionLocks>,
    assembler: Assembler,
    presign: PresignRegistry,
}

impl UploadService {
    pub fn new(
        config: ServerConfig,
        chunks: Arc<dyn ChunkStore>,
        sessions: Arc<SessionStore>,
        publisher: ObjectPublisher,
    ) -> Self {
        let locks = Arc::new(SessionLocks::new());
        let assembler = Assembler::new(chunks.clone(), sessions.clone(), publisher, locks.clone());
        let presign = PresignRegistry::new(config.presign_ttl);
        Self {
            config,
            chunks,
            sessions,
            locks,
            assembler,
            presign,
        }
    }

    /// Build the storage stack described by `config`.
    pub async fn from_config(config: ServerConfig) -> ServiceResult<Self> {
        let chunks: Arc<dyn ChunkStore> = if config.in_memory_chunks {
            Arc::new(MemoryChunkStore::new())
        } else {
            Arc::new(DiskChunkStore::new(&config.chunk_dir).await?)
        };

        if let Some(db_path) = sqlite_file_path(&config.database_url) {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let sessions = Arc::new(SessionStore::new(&config.database_url).await?);
        let publisher =
            ObjectPublisher::new(&config.objects_dir, config.public_base_url.clone()).await?;

        info!(
            chunk_dir = %config.chunk_dir.display(),
            objects_dir = %config.objects_dir.display(),
            in_memory = config.in_memory_chunks,
            "upload service ready"
        );
        Ok(Self::new(config, chunks, sessions, publisher))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn chunks(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    pub fn publisher(&self) -> &ObjectPublisher {
        self.assembler.publisher()
    }

    /// Validate and durably store one chunk, creating the session on first contact.
    pub async fn accept_chunk(&self, submission: ChunkSubmission) -> ServiceResult<ChunkReceipt> {
        let result = self.accept_chunk_inner(submission).await;
        if let Err(err) = &result {
            record_chunk_rejected(err.reason());
        }
        result
    }

    async fn accept_chunk_inner(&self, submission: ChunkSubmission) -> ServiceResult<ChunkReceipt> {
        let file_name = self.validate_submission(&submission)?;
        let checksum = IntegrityVerifier::checksum_hex(&submission.data);
        if let Some(declared) = &submission.checksum {
            if !IntegrityVerifier::checksums_match(declared, &checksum) {
                warn!(
                    upload_id = %submission.upload_id,
                    index = submission.index,
                    "chunk checksum mismatch"
                );
                return Err(ServiceError::ChecksumMismatch {
                    expected: declared.clone(),
                    actual: checksum,
                });
            }
        }

        let upload_id = submission.upload_id.as_str();
        let _guard = self.locks.shared(upload_id).await;

        let session = match self.sessions.load(upload_id).await? {
            Some(session) => session,
            None => {
                let session = UploadSession::new(
                    upload_id,
                    file_name.clone(),
                    submission.file_type.clone(),
                    submission.file_size,
                    submission.chunk_size,
                    submission.total_chunks,
                );
                if self.sessions.create_if_absent(&session).await? {
                    info!(
                        upload_id,
                        file_name = %session.file_name,
                        total_chunks = session.total_chunks,
                        "upload session created"
                    );
                }
                self.sessions
                    .load(upload_id)
                    .await?
                    .ok_or_else(|| ServiceError::UnknownSession(upload_id.to_string()))?
            }
        };

        check_matches_session(&session, &submission, &file_name)?;

        match session.status {
            UploadStatus::Completed => {
                debug!(upload_id, index = submission.index, "chunk for completed upload ignored");
                return Ok(ChunkReceipt {
                    upload_id: upload_id.to_string(),
                    index: submission.index,
                    size: submission.data.len() as u64,
                    checksum,
                    stored: false,
                });
            }
            UploadStatus::Cancelled => {
                return Err(ServiceError::Conflict(format!(
                    "upload {upload_id} was cancelled"
                )));
            }
            _ => {}
        }

        let record = self
            .chunks
            .put(upload_id, submission.index, submission.data, checksum)
            .await?;
        self.sessions.touch_uploading(upload_id).await?;
        record_chunk_stored(record.size);
        debug!(upload_id, index = record.index, size = record.size, "chunk stored");

        Ok(ChunkReceipt {
            upload_id: record.upload_id,
            index: record.index,
            size: record.size,
            checksum: record.checksum,
            stored: true,
        })
    }

    /// Returns the sanitized file name.
    fn validate_submission(&self, submission: &ChunkSubmission) -> ServiceResult<String> {
        validate_upload_id(&submission.upload_id)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let file_name = sanitize_file_name(&submission.file_name)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        if submission.total_chunks == 0 {
            return Err(ServiceError::Validation("totalChunks must be at least 1".into()));
        }
        if submission.index >= submission.total_chunks {
            return Err(ServiceError::Validation(format!(
                "chunkIndex {} out of range for {} chunks",
                submission.index, submission.total_chunks
            )));
        }
        if submission.file_size > self.config.max_file_size {
            return Err(ServiceError::TooLarge(format!(
                "file of {} bytes exceeds limit of {}",
                submission.file_size, self.config.max_file_size
            )));
        }
        let len = submission.data.len() as u64;
        if len > self.config.max_chunk_size {
            return Err(ServiceError::TooLarge(format!(
                "chunk of {len} bytes exceeds limit of {}",
                self.config.max_chunk_size
            )));
        }
        if len > submission.file_size {
            return Err(ServiceError::Validation(format!(
                "chunk of {len} bytes is larger than the file ({} bytes)",
                submission.file_size
            )));
        }
        if !self.config.accepts_type(&submission.file_type) {
            return Err(ServiceError::UnsupportedType(submission.file_type.clone()));
        }

        if let Some(chunk_size) = submission.chunk_size {
            let plan = ChunkPlan::new(submission.file_size, chunk_size)
                .map_err(|e| ServiceError::Validation(e.to_string()))?;
            if plan.total_chunks() != submission.total_chunks {
                return Err(ServiceError::Validation(format!(
                    "totalChunks {} does not match {} bytes in chunks of {}",
                    submission.total_chunks, submission.file_size, chunk_size
                )));
            }
            let expected = plan.expected_len(submission.index).unwrap_or(0);
            if expected != len {
                return Err(ServiceError::Validation(format!(
                    "chunk {} should be {expected} bytes, got {len}",
                    submission.index
                )));
            }
        }

        if let Some(declared) = &submission.checksum {
            IntegrityVerifier::parse_checksum(declared).map_err(|e: IntegrityError| {
                ServiceError::Validation(format!("malformed checksum: {e}"))
            })?;
        }

        Ok(file_name)
    }

    /// Indices already stored for `upload_id`. Unknown uploads resolve to an empty state.
    pub async fn check_chunks(&self, upload_id: &str, total_chunks: u32) -> ServiceResult<ResumeState> {
        validate_upload_id(upload_id).map_err(|e| ServiceError::Validation(e.to_string()))?;

        let Some(session) = self.sessions.load(upload_id).await? else {
            return Ok(ResumeState::empty());
        };

        if session.total_chunks != total_chunks {
            return Err(ServiceError::Validation(format!(
                "totalChunks {total_chunks} does not match session ({})",
                session.total_chunks
            )));
        }

        let uploaded = match session.status {
            UploadStatus::Completed => (0..session.total_chunks).collect(),
            UploadStatus::Cancelled => Default::default(),
            _ => self
                .chunks
                .list_indices(upload_id)
                .await?
                .into_iter()
                .filter(|i| *i < session.total_chunks)
                .collect(),
        };

        Ok(ResumeState {
            uploaded,
            status: Some(session.status),
            url: session.final_url,
        })
    }

    pub async fn merge(&self, request: MergeRequest) -> ServiceResult<MergeOutcome> {
        validate_upload_id(&request.upload_id)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let session = self
            .sessions
            .load(&request.upload_id)
            .await?
            .ok_or_else(|| ServiceError::UnknownSession(request.upload_id.clone()))?;
        let file_name = sanitize_file_name(&request.file_name)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        if file_name != session.file_name {
            return Err(ServiceError::Validation(format!(
                "fileName `{file_name}` does not match session (`{}`)",
                session.file_name
            )));
        }

        Ok(self.assembler.merge(&request).await?)
    }

    /// Create a single-chunk session and a time-limited grant to PUT its bytes.
    pub async fn presign(
        &self,
        file_name: &str,
        file_type: Option<&str>,
        file_size: Option<u64>,
    ) -> ServiceResult<PresignGrant> {
        let file_name =
            sanitize_file_name(file_name).map_err(|e| ServiceError::Validation(e.to_string()))?;
        let file_type = file_type
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_FILE_TYPE)
            .to_string();
        if !self.config.accepts_type(&file_type) {
            return Err(ServiceError::UnsupportedType(file_type));
        }
        if let Some(size) = file_size {
            if size > self.config.max_file_size.min(self.config.max_chunk_size) {
                return Err(ServiceError::TooLarge(format!(
                    "presigned uploads are limited to {} bytes",
                    self.config.max_file_size.min(self.config.max_chunk_size)
                )));
            }
        }

        let upload_id = derive_upload_id(&file_name, file_size.unwrap_or(0), &new_nonce());
        let session = UploadSession::new(
            &upload_id,
            file_name.clone(),
            file_type.clone(),
            file_size.unwrap_or(0),
            None,
            1,
        );
        self.sessions.save(&session).await?;

        let ticket = self.presign.issue(&upload_id, &file_name, &file_type, file_size);
        let url = format!(
            "{}/presigned/{}?token={}",
            self.config.public_base_url.trim_end_matches('/'),
            upload_id,
            ticket.token
        );
        info!(upload_id = %upload_id, file_name = %file_name, "presigned upload granted");

        Ok(PresignGrant {
            upload_id,
            url,
            token: ticket.token,
            expires_at: ticket.expires_at,
        })
    }

    /// Store the body of a presigned PUT as chunk 0 and assemble it.
    ///
    /// Repeating the PUT after completion returns the same URL.
    pub async fn put_presigned(
        &self,
        upload_id: &str,
        token: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> ServiceResult<MergeOutcome> {
        validate_upload_id(upload_id).map_err(|e| ServiceError::Validation(e.to_string()))?;
        let ticket = self
            .presign
            .check(upload_id, token)
            .map_err(ServiceError::PresignDenied)?;

        let declared = mime_essence(&ticket.file_type);
        let received = content_type.map(mime_essence).unwrap_or_default();
        if declared != received {
            return Err(ServiceError::UnsupportedType(format!(
                "Content-Type `{received}` does not match presigned type `{declared}`"
            )));
        }

        let len = body.len() as u64;
        if len > self.config.max_file_size.min(self.config.max_chunk_size) {
            return Err(ServiceError::TooLarge(format!("body of {len} bytes")));
        }
        if let Some(size) = ticket.file_size {
            if size != len {
                return Err(ServiceError::Validation(format!(
                    "body is {len} bytes, presigned for {size}"
                )));
            }
        }

        {
            let _guard = self.locks.shared(upload_id).await;
            let mut session = self
                .sessions
                .load(upload_id)
                .await?
                .ok_or_else(|| ServiceError::UnknownSession(upload_id.to_string()))?;

            if session.status != UploadStatus::Completed {
                if session.status == UploadStatus::Cancelled {
                    return Err(ServiceError::Conflict(format!(
                        "upload {upload_id} was cancelled"
                    )));
                }
                if ticket.file_size.is_none() && session.total_size != len {
                    session.total_size = len;
                    self.sessions.save(&session).await?;
                }
                let checksum = IntegrityVerifier::checksum_hex(&body);
                let record = self.chunks.put(upload_id, 0, body, checksum).await?;
                self.sessions.touch_uploading(upload_id).await?;
                record_chunk_stored(record.size);
            }
        }

        let outcome = self
            .assembler
            .merge(&MergeRequest {
                upload_id: upload_id.to_string(),
                file_name: ticket.file_name,
                file_type: ticket.file_type,
                expected_checksum: None,
            })
            .await?;
        Ok(outcome)
    }

    /// Final notification of a presigned upload. Returns the object URL.
    pub async fn confirm_presigned(&self, upload_id: &str, file_name: &str) -> ServiceResult<String> {
        validate_upload_id(upload_id).map_err(|e| ServiceError::Validation(e.to_string()))?;
        let session = self
            .sessions
            .load(upload_id)
            .await?
            .ok_or_else(|| ServiceError::UnknownSession(upload_id.to_string()))?;

        let file_name =
            sanitize_file_name(file_name).map_err(|e| ServiceError::Validation(e.to_string()))?;
        if file_name != session.file_name {
            return Err(ServiceError::Validation(format!(
                "fileName `{file_name}` does not match session (`{}`)",
                session.file_name
            )));
        }

        match (session.status, session.final_url) {
            (UploadStatus::Completed, Some(url)) => Ok(url),
            _ => Err(ServiceError::Incomplete {
                upload_id: upload_id.to_string(),
                missing: vec![0],
            }),
        }
    }

    pub async fn session(&self, upload_id: &str) -> ServiceResult<Option<UploadSession>> {
        validate_upload_id(upload_id).map_err(|e| ServiceError::Validation(e.to_string()))?;
        Ok(self.sessions.load(upload_id).await?)
    }

    /// Cancel a session: its chunks and any published object are removed and the record
    /// stays as `cancelled` until it expires. Returns false for unknown ids.
    pub async fn delete_session(&self, upload_id: &str) -> ServiceResult<bool> {
        validate_upload_id(upload_id).map_err(|e| ServiceError::Validation(e.to_string()))?;
        let cancelled = {
            let _guard = self.locks.exclusive(upload_id).await;
            self.cancel_locked(upload_id).await
        };
        self.locks.release(upload_id);
        cancelled
    }

    /// Caller holds the exclusive lock of `upload_id`.
    async fn cancel_locked(&self, upload_id: &str) -> ServiceResult<bool> {
        if !self.sessions.exists(upload_id).await? {
            return Ok(false);
        }

        let removed = self.chunks.delete(upload_id).await?;
        self.assembler.publisher().remove(upload_id).await?;
        self.presign.remove(upload_id);
        self.sessions
            .update_status(upload_id, UploadStatus::Cancelled, None)
            .await?;

        info!(upload_id, removed, "upload session cancelled");
        Ok(true)
    }

    /// Remove sessions idle for longer than `ttl`.
    ///
    /// Open sessions lose their chunks and record; finished sessions lose only the
    /// record, published objects stay.
    pub async fn collect_expired(&self, ttl: Duration) -> ServiceResult<GcReport> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp().saturating_sub(ttl);
        let mut report = GcReport::default();

        for stale in self.sessions.list_stale(cutoff).await? {
            let upload_id = stale.upload_id.as_str();
            let expired = {
                let _guard = self.locks.exclusive(upload_id).await;
                self.expire_locked(upload_id, cutoff).await
            };
            self.locks.release(upload_id);
            if let Some(chunks_removed) = expired? {
                report.chunks_removed += chunks_removed;
                report.sessions_removed += 1;
            }
        }

        report.tickets_purged = self.presign.purge_expired();
        if report.sessions_removed > 0 {
            record_sessions_expired(report.sessions_removed);
            info!(
                sessions = report.sessions_removed,
                chunks = report.chunks_removed,
                "expired upload sessions collected"
            );
        }
        Ok(report)
    }

    /// Caller holds the exclusive lock of `upload_id`. Returns the number of chunks
    /// removed, or `None` when the session is gone or was touched since the listing.
    async fn expire_locked(&self, upload_id: &str, cutoff: i64) -> ServiceResult<Option<usize>> {
        let Some(session) = self.sessions.load(upload_id).await? else {
            return Ok(None);
        };
        if session.updated_at >= cutoff {
            return Ok(None);
        }

        let chunks_removed = if session.status != UploadStatus::Completed {
            self.chunks.delete(upload_id).await?
        } else {
            0
        };
        self.sessions.delete(upload_id).await?;
        self.presign.remove(upload_id);
        debug!(upload_id, status = %session.status, "expired session removed");
        Ok(Some(chunks_removed))
    }
}

fn check_matches_session(
    session: &UploadSession,
    submission: &ChunkSubmission,
    file_name: &str,
) -> ServiceResult<()> {
    let mismatch = if session.total_size != submission.file_size {
        Some(format!(
            "fileSize {} (session has {})",
            submission.file_size, session.total_size
        ))
    } else if session.total_chunks != submission.total_chunks {
        Some(format!(
            "totalChunks {} (session has {})",
            submission.total_chunks, session.total_chunks
        ))
    } else if session.file_name != file_name {
        Some(format!("fileName `{file_name}` (session has `{}`)", session.file_name))
    } else {
        match (session.chunk_size, submission.chunk_size) {
            (Some(a), Some(b)) if a != b => Some(format!("chunkSize {b} (session has {a})")),
            _ => None,
        }
    };

    match mismatch {
        Some(detail) => Err(ServiceError::Validation(format!(
            "chunk does not match upload {}: {detail}",
            session.upload_id
        ))),
        None => Ok(()),
    }
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn sqlite_file_path(database_url: &str) -> Option<&Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Some(Path::new(path))
}

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::MergeRequest;
use crate::chunk::{derive_upload_id, new_nonce, Chunker, FileManifest};
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::progress::ProgressTracker;
use crate::coordinator::state_machine::UploadStateMachine;
use crate::coordinator::types::{
    StateEvent, UploadEvent, UploadOptions, UploadOutcome, UploadProgress, UploadState,
};
use crate::metrics::recorder::record_chunks_skipped;
use crate::metrics::{ChunkTimer, UploadMetrics};
use crate::transport::{
    ChunkUpload, ResumeResolver, RetryPolicy, TransportError, UploadTransport,
};

/// Drives one file through resolve, transfer and merge.
///
/// A failed or cancelled upload can be run again; the same upload id is reused and
/// chunks the server already holds are skipped.
pub struct UploadCoordinator {
    manifest: Arc<FileManifest>,
    chunker: Arc<Chunker>,
    transport: Arc<dyn UploadTransport>,
    resolver: ResumeResolver,
    options: UploadOptions,

    state_machine: UploadStateMachine,
    progress: Mutex<ProgressTracker>,

    // Replaced on every run so a cancelled run does not poison the next one
    cancel: Mutex<CancellationToken>,
    file_checksum: OnceCell<String>,

    event_tx: mpsc::UnboundedSender<UploadEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<UploadEvent>>>,
}

struct ChunkOutcome {
    index: u32,
    result: CoordinatorResult<u64>,
}

/// What a chunk worker needs, owned so the task can be spawned.
#[derive(Clone)]
struct ChunkWorker {
    manifest: Arc<FileManifest>,
    chunker: Arc<Chunker>,
    transport: Arc<dyn UploadTransport>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ChunkWorker {
    async fn send(self, index: u32) -> ChunkOutcome {
        let result = self.send_inner(index).await;
        ChunkOutcome { index, result }
    }

    async fn send_inner(&self, index: u32) -> CoordinatorResult<u64> {
        let chunk = self
            .chunker
            .read_chunk(&self.manifest.upload_id, index)
            .await?;
        let upload = ChunkUpload::new(&self.manifest, chunk);
        let size = upload.len();
        let timer = ChunkTimer::start();

        let transport = &self.transport;
        let upload = &upload;
        self.retry
            .run(&self.cancel, move |attempt| {
                debug!(upload_id = %upload.upload_id, index, attempt, "sending chunk");
                transport.send_chunk(upload)
            })
            .await
            .map_err(|e| match e {
                TransportError::Cancelled => CoordinatorError::Cancelled,
                source => CoordinatorError::ChunkFailed { index, source },
            })?;

        timer.stop(size);
        Ok(size)
    }
}

impl UploadCoordinator {
    /// New upload with a freshly derived id.
    pub fn new(
        chunker: Chunker,
        file_name: &str,
        file_type: &str,
        transport: Arc<dyn UploadTransport>,
        options: UploadOptions,
    ) -> Self {
        let upload_id = derive_upload_id(file_name, chunker.plan().total_size(), &new_nonce());
        Self::with_upload_id(upload_id, chunker, file_name, file_type, transport, options)
    }

    /// Upload under a known id, e.g. one persisted by an earlier process.
    pub fn with_upload_id(
        upload_id: impl Into<String>,
        chunker: Chunker,
        file_name: &str,
        file_type: &str,
        transport: Arc<dyn UploadTransport>,
        options: UploadOptions,
    ) -> Self {
        let manifest = chunker.manifest(&upload_id.into(), file_name, file_type);
        let progress = ProgressTracker::new(chunker.plan(), options.progress_mode);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            manifest: Arc::new(manifest),
            chunker: Arc::new(chunker),
            resolver: ResumeResolver::new(transport.clone()),
            transport,
            options,
            state_machine: UploadStateMachine::new(),
            progress: Mutex::new(progress),
            cancel: Mutex::new(CancellationToken::new()),
            file_checksum: OnceCell::new(),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Send events to a shared channel instead of this coordinator's own.
    pub fn with_event_sender(mut self, event_tx: mpsc::UnboundedSender<UploadEvent>) -> Self {
        self.event_tx = event_tx;
        *self.event_rx.get_mut() = None;
        self
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.event_rx.lock().take()
    }

    pub fn upload_id(&self) -> &str {
        &self.manifest.upload_id
    }

    pub fn manifest(&self) -> &FileManifest {
        &self.manifest
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn state(&self) -> UploadState {
        self.state_machine.current_state()
    }

    pub async fn wait_terminal(&self) -> UploadState {
        self.state_machine.wait_terminal().await
    }

    pub fn progress(&self) -> UploadProgress {
        self.progress.lock().snapshot(self.upload_id())
    }

    /// Stop issuing chunk sends. In-flight sends finish, and no merge follows.
    pub fn cancel(&self) {
        let token = self.cancel.lock();
        token.cancel();

        if self.state_machine.current_state() == UploadState::Idle
            && self.state_machine.transition(StateEvent::Cancel).is_ok()
        {
            self.emit_state(UploadState::Cancelled);
            self.emit(UploadEvent::Cancelled {
                upload_id: self.upload_id().to_string(),
            });
        }
    }

    /// Upload the file, or resume a failed or cancelled upload.
    ///
    /// Once completed, further calls return the same URL without touching the network.
    pub async fn run(&self) -> CoordinatorResult<UploadOutcome> {
        if let Some(outcome) = self.begin()? {
            return Ok(outcome);
        }
        self.execute().await
    }

    /// Move into `Resolving`. Returns the outcome directly if already completed.
    pub(crate) fn begin(&self) -> CoordinatorResult<Option<UploadOutcome>> {
        let mut cancel = self.cancel.lock();

        let event = match self.state_machine.current_state() {
            UploadState::Completed { url } => return Ok(Some(UploadOutcome::Completed { url })),
            UploadState::Idle => StateEvent::Start,
            state if state.can_restart() => StateEvent::Restart,
            state => {
                return Err(CoordinatorError::InvalidStateTransition(format!(
                    "upload {} is already {}",
                    self.upload_id(),
                    state.name()
                )))
            }
        };

        *cancel = CancellationToken::new();
        let state = self.state_machine.transition(event)?;
        drop(cancel);

        info!(
            upload_id = %self.upload_id(),
            file = %self.manifest.file_name,
            size = self.manifest.total_size,
            chunks = self.manifest.total_chunks,
            "upload started"
        );
        self.emit_state(state);
        Ok(None)
    }

    /// Run resolve, transfer and merge, then settle into a terminal state.
    pub(crate) async fn execute(&self) -> CoordinatorResult<UploadOutcome> {
        let token = self.cancel.lock().clone();
        let mut metrics = UploadMetrics::start(self.manifest.total_size);
        let upload_id = self.upload_id().to_string();

        match self.drive(&token, &mut metrics).await {
            Ok(url) => {
                self.advance(StateEvent::MergeSucceeded { url: url.clone() })?;
                info!(
                    upload_id = %upload_id,
                    %url,
                    elapsed_ms = metrics.elapsed().as_millis() as u64,
                    throughput = metrics.throughput(),
                    "upload completed"
                );
                self.emit(UploadEvent::Success {
                    upload_id,
                    url: url.clone(),
                });
                metrics.complete();
                Ok(UploadOutcome::Completed { url })
            }
            Err(CoordinatorError::Cancelled) => {
                self.advance(StateEvent::Cancel)?;
                info!(upload_id = %upload_id, "upload cancelled");
                self.emit(UploadEvent::Cancelled { upload_id });
                metrics.cancel();
                Ok(UploadOutcome::Cancelled)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(upload_id = %upload_id, error = %message, "upload failed");
                self.advance(StateEvent::Fail {
                    error: message.clone(),
                })?;
                self.emit(UploadEvent::Error { upload_id, message });
                metrics.fail(e.reason());
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        token: &CancellationToken,
        metrics: &mut UploadMetrics,
    ) -> CoordinatorResult<String> {
        let upload_id = self.upload_id();
        let total = self.manifest.total_chunks;

        let resolver = &self.resolver;
        let resume = self
            .options
            .retry
            .run(token, move |_| resolver.resolve(upload_id, total))
            .await
            .map_err(|e| match e {
                TransportError::Cancelled => CoordinatorError::Cancelled,
                e => CoordinatorError::Resolve(e),
            })?;
        if token.is_cancelled() {
            return Err(CoordinatorError::Cancelled);
        }
        self.advance(StateEvent::Resolved)?;

        let stored = resume.uploaded;
        self.progress.lock().reset_unsent(|index| stored.contains(&index));
        for &index in &stored {
            let percent = self.progress.lock().mark_sent(index);
            self.emit_chunk_complete(index, true, percent);
        }
        record_chunks_skipped(stored.len());

        let pending: Vec<u32> = (0..total).filter(|i| !stored.contains(i)).collect();
        debug!(
            upload_id,
            skipped = stored.len(),
            pending = pending.len(),
            "transferring chunks"
        );
        self.transfer(pending, token, metrics).await?;

        // A cancel that lands after the last chunk still prevents the merge.
        if token.is_cancelled() {
            return Err(CoordinatorError::Cancelled);
        }
        self.advance(StateEvent::AllChunksSent)?;

        let expected_checksum = if self.options.verify_whole_file {
            let checksum = self
                .file_checksum
                .get_or_try_init(|| self.chunker.file_checksum())
                .await?;
            Some(checksum.clone())
        } else {
            None
        };
        let request = MergeRequest {
            upload_id: upload_id.to_string(),
            file_name: self.manifest.file_name.clone(),
            file_type: self.manifest.file_type.clone(),
            expected_checksum,
        };

        let transport = &self.transport;
        let request = &request;
        self.options
            .retry
            .run(token, move |_| transport.merge(request))
            .await
            .map_err(|e| match e {
                TransportError::Cancelled => CoordinatorError::Cancelled,
                TransportError::Incomplete { missing, .. } => {
                    CoordinatorError::Incomplete { missing }
                }
                e => CoordinatorError::Merge(e),
            })
    }

    /// Send `pending` with at most `concurrency` chunks in flight.
    ///
    /// The first terminal chunk failure stops new sends; chunks already in flight
    /// are allowed to finish.
    async fn transfer(
        &self,
        pending: Vec<u32>,
        token: &CancellationToken,
        metrics: &mut UploadMetrics,
    ) -> CoordinatorResult<()> {
        let concurrency = self.options.concurrency.max(1);
        let worker = ChunkWorker {
            manifest: self.manifest.clone(),
            chunker: self.chunker.clone(),
            transport: self.transport.clone(),
            retry: self.options.retry.clone(),
            cancel: token.clone(),
        };

        let mut queue = pending.into_iter();
        let mut workers = JoinSet::new();
        let mut failure: Option<CoordinatorError> = None;

        loop {
            while failure.is_none() && !token.is_cancelled() && workers.len() < concurrency {
                let Some(index) = queue.next() else { break };
                self.progress.lock().mark_sending(index);
                workers.spawn(worker.clone().send(index));
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            match joined {
                Ok(ChunkOutcome {
                    index,
                    result: Ok(size),
                }) => {
                    metrics.add_bytes(size);
                    let percent = self.progress.lock().mark_sent(index);
                    self.emit_chunk_complete(index, false, percent);
                }
                Ok(ChunkOutcome {
                    index,
                    result: Err(e),
                }) => {
                    self.progress.lock().mark_error(index);
                    if !matches!(e, CoordinatorError::Cancelled) {
                        warn!(upload_id = %self.upload_id(), index, error = %e, "chunk failed");
                    }
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(CoordinatorError::Worker(e.to_string()));
                }
            }
        }

        if token.is_cancelled() {
            return Err(CoordinatorError::Cancelled);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn advance(&self, event: StateEvent) -> CoordinatorResult<UploadState> {
        let state = self.state_machine.transition(event)?;
        debug!(upload_id = %self.upload_id(), state = state.name(), "state changed");
        self.emit_state(state.clone());
        Ok(state)
    }

    fn emit_state(&self, state: UploadState) {
        self.emit(UploadEvent::StateChanged {
            upload_id: self.upload_id().to_string(),
            state,
        });
    }

    fn emit_chunk_complete(&self, index: u32, skipped: bool, percent: u8) {
        let upload_id = self.upload_id().to_string();
        self.emit(UploadEvent::ChunkComplete {
            upload_id: upload_id.clone(),
            index,
            total: self.manifest.total_chunks,
            skipped,
        });
        self.emit(UploadEvent::Progress { upload_id, percent });
    }

    fn emit(&self, event: UploadEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.send(event);
    }
}

use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chunk::Chunker;
use crate::coordinator::{UploadCoordinator, UploadEvent, UploadOptions, UploadOutcome, UploadState};
use crate::manager::error::{ManagerError, ManagerResult};
use crate::manager::types::FileStatus;
use crate::transport::UploadTransport;

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// Runs one [`UploadCoordinator`] per file, each on its own task.
///
/// Files are keyed by upload id. Events from every file arrive on one channel.
pub struct UploadManager {
    transport: Arc<dyn UploadTransport>,
    options: UploadOptions,
    files: DashMap<String, Arc<UploadCoordinator>>,
    // Insertion order for `list`
    order: Mutex<Vec<String>>,
    event_tx: mpsc::UnboundedSender<UploadEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<UploadEvent>>>,
}

impl UploadManager {
    pub fn new(transport: Arc<dyn UploadTransport>, options: UploadOptions) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            options,
            files: DashMap::new(),
            order: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.event_rx.lock().take()
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Queue a file from disk. Returns its upload id.
    pub async fn add_file(
        &self,
        path: impl AsRef<Path>,
        file_type: Option<&str>,
    ) -> ManagerResult<String> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let chunker = Chunker::open(path, self.options.chunk_size).await?;
        Ok(self.insert(chunker, &file_name, file_type.unwrap_or(DEFAULT_FILE_TYPE)))
    }

    /// Queue an in-memory file. Returns its upload id.
    pub fn add_bytes(
        &self,
        file_name: &str,
        file_type: &str,
        data: impl Into<bytes::Bytes>,
    ) -> ManagerResult<String> {
        let chunker = Chunker::from_bytes(data, self.options.chunk_size)?;
        Ok(self.insert(chunker, file_name, file_type))
    }

    fn insert(&self, chunker: Chunker, file_name: &str, file_type: &str) -> String {
        let coordinator = UploadCoordinator::new(
            chunker,
            file_name,
            file_type,
            self.transport.clone(),
            self.options.clone(),
        )
        .with_event_sender(self.event_tx.clone());
        let id = coordinator.upload_id().to_string();

        info!(upload_id = %id, file = file_name, "file added");
        self.files.insert(id.clone(), Arc::new(coordinator));
        self.order.lock().push(id.clone());
        id
    }

    fn coordinator(&self, id: &str) -> ManagerResult<Arc<UploadCoordinator>> {
        self.files
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ManagerError::UnknownFile(id.to_string()))
    }

    /// Start (or restart) the upload on its own task.
    pub fn start(&self, id: &str) -> ManagerResult<()> {
        let coordinator = self.coordinator(id)?;
        // Enter Resolving before spawning so `wait` never sees a stale terminal state.
        if coordinator.begin()?.is_some() {
            return Ok(());
        }

        tokio::spawn(async move {
            // Failures are reported through events and the coordinator state.
            let _ = coordinator.execute().await;
        });
        Ok(())
    }

    /// Start every file that has not been started yet.
    pub fn start_all(&self) -> usize {
        let mut started = 0;
        for id in self.ids() {
            let idle = self
                .files
                .get(&id)
                .map(|c| c.state() == UploadState::Idle)
                .unwrap_or(false);
            if idle && self.start(&id).is_ok() {
                started += 1;
            }
        }
        started
    }

    /// Restart a failed or cancelled file. Its stored chunks are not resent.
    pub fn retry(&self, id: &str) -> ManagerResult<()> {
        let state = self.coordinator(id)?.state();
        if !state.can_restart() {
            return Err(ManagerError::NotRetriable {
                id: id.to_string(),
                state: state.name(),
            });
        }
        self.start(id)
    }

    pub fn cancel(&self, id: &str) -> ManagerResult<()> {
        self.coordinator(id)?.cancel();
        Ok(())
    }

    /// Drop a file from the list, cancelling its upload if one is running.
    ///
    /// Chunks already stored on the server are left there.
    pub fn remove(&self, id: &str) -> bool {
        let Some((_, coordinator)) = self.files.remove(id) else {
            return false;
        };
        self.order.lock().retain(|other| other != id);

        if coordinator.state().is_active() {
            warn!(upload_id = %id, "removing file with an upload in progress");
        }
        coordinator.cancel();
        true
    }

    pub fn status(&self, id: &str) -> Option<FileStatus> {
        self.files.get(id).map(|c| file_status(&c))
    }

    pub fn list(&self) -> Vec<FileStatus> {
        self.ids()
            .iter()
            .filter_map(|id| self.status(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Mean of every file's percentage, 0 with no files.
    pub fn aggregate_progress(&self) -> f64 {
        let percents: Vec<f64> = self
            .files
            .iter()
            .map(|c| c.progress().percent as f64)
            .collect();
        if percents.is_empty() {
            return 0.0;
        }
        percents.iter().sum::<f64>() / percents.len() as f64
    }

    /// Wait for a started file to settle.
    pub async fn wait(&self, id: &str) -> ManagerResult<UploadOutcome> {
        let coordinator = self.coordinator(id)?;
        if coordinator.state() == UploadState::Idle {
            return Err(ManagerError::NotStarted(id.to_string()));
        }

        match coordinator.wait_terminal().await {
            UploadState::Completed { url } => Ok(UploadOutcome::Completed { url }),
            UploadState::Cancelled => Ok(UploadOutcome::Cancelled),
            UploadState::Failed { error } => Err(ManagerError::Failed {
                id: id.to_string(),
                error,
            }),
            state => Err(ManagerError::Failed {
                id: id.to_string(),
                error: format!("upload settled in state {}", state.name()),
            }),
        }
    }

    /// Wait for every started file, in list order.
    pub async fn wait_all(&self) -> Vec<(String, ManagerResult<UploadOutcome>)> {
        let mut results = Vec::new();
        for id in self.ids() {
            let result = self.wait(&id).await;
            if matches!(result, Err(ManagerError::NotStarted(_))) {
                continue;
            }
            results.push((id, result));
        }
        results
    }

    fn ids(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

fn file_status(coordinator: &UploadCoordinator) -> FileStatus {
    let state = coordinator.state();
    let manifest = coordinator.manifest();
    let (url, error) = match &state {
        UploadState::Completed { url } => (Some(url.clone()), None),
        UploadState::Failed { error } => (None, Some(error.clone())),
        _ => (None, None),
    };

    FileStatus {
        id: manifest.upload_id.clone(),
        file_name: manifest.file_name.clone(),
        file_size: manifest.total_size,
        percent: coordinator.progress().percent,
        state,
        url,
        error,
    }
}

//! End-to-end upload scenarios: client coordinator and manager against the real
//! server stack (disk chunk store, SQLite sessions, assembler), in-process and over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use resumable_upload::api::create_api_server;
use resumable_upload::assembler::MergeRequest;
use resumable_upload::chunk::Chunker;
use resumable_upload::config::ServerConfig;
use resumable_upload::coordinator::{
    UploadCoordinator, UploadEvent, UploadOptions, UploadOutcome, UploadState,
};
use resumable_upload::integrity::IntegrityVerifier;
use resumable_upload::manager::{ManagerError, UploadManager};
use resumable_upload::server::{ServiceError, UploadService};
use resumable_upload::transport::{
    ChunkUpload, HttpTransport, LocalTransport, ResumeState, RetryPolicy, TransportError,
    TransportResult, UploadTransport,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

struct Harness {
    _dir: TempDir,
    service: Arc<UploadService>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_public_url("http://localhost:3000").await
    }

    async fn with_public_url(public_url: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            chunk_dir: dir.path().join("chunks"),
            objects_dir: dir.path().join("objects"),
            database_url: format!("sqlite://{}", dir.path().join("uploads.db").display()),
            public_base_url: public_url.to_string(),
            ..ServerConfig::default()
        };
        let service = Arc::new(UploadService::from_config(config).await.unwrap());
        Self { _dir: dir, service }
    }

    fn local(&self) -> LocalTransport {
        LocalTransport::new(self.service.clone())
    }

    async fn published(&self, upload_id: &str, file_name: &str) -> Vec<u8> {
        let path = self.service.publisher().object_path(upload_id, file_name);
        tokio::fs::read(path).await.unwrap()
    }
}

/// Wraps a transport, records every chunk send and injects failures.
struct FaultyTransport {
    inner: Arc<dyn UploadTransport>,
    sends: Mutex<Vec<(String, u32)>>,
    /// Chunk 1 of these files is rejected.
    poisoned_files: Mutex<HashSet<String>>,
    merge_unavailable: AtomicBool,
    send_delay: Option<Duration>,
}

impl FaultyTransport {
    fn new(inner: impl UploadTransport + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            sends: Mutex::new(Vec::new()),
            poisoned_files: Mutex::new(HashSet::new()),
            merge_unavailable: AtomicBool::new(false),
            send_delay: None,
        }
    }

    fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    fn sends_for(&self, upload_id: &str) -> Vec<u32> {
        self.sends
            .lock()
            .iter()
            .filter(|(id, _)| id == upload_id)
            .map(|(_, index)| *index)
            .collect()
    }
}

#[async_trait]
impl UploadTransport for FaultyTransport {
    async fn send_chunk(&self, chunk: &ChunkUpload) -> TransportResult<()> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.sends
            .lock()
            .push((chunk.upload_id.clone(), chunk.index));
        if chunk.index == 1 && self.poisoned_files.lock().contains(&chunk.file_name) {
            return Err(TransportError::Rejected {
                status: 400,
                code: None,
                message: "poisoned chunk".into(),
            });
        }
        self.inner.send_chunk(chunk).await
    }

    async fn check_chunks(&self, upload_id: &str, total_chunks: u32) -> TransportResult<ResumeState> {
        self.inner.check_chunks(upload_id, total_chunks).await
    }

    async fn merge(&self, request: &MergeRequest) -> TransportResult<String> {
        if self.merge_unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Server {
                status: 503,
                message: "maintenance".into(),
            });
        }
        self.inner.merge(request).await
    }
}

fn file_data(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn fast_options(chunk_size: u64) -> UploadOptions {
    UploadOptions {
        chunk_size,
        retry: RetryPolicy::immediate(2),
        ..UploadOptions::default()
    }
}

async fn send_raw(transport: &dyn UploadTransport, chunker: &Chunker, upload_id: &str, name: &str, index: u32) {
    let manifest = chunker.manifest(upload_id, name, "application/octet-stream");
    let chunk = chunker.read_chunk(upload_id, index).await.unwrap();
    transport
        .send_chunk(&ChunkUpload::new(&manifest, chunk))
        .await
        .unwrap();
}

fn coordinator(
    upload_id: &str,
    data: Vec<u8>,
    chunk_size: u64,
    transport: Arc<dyn UploadTransport>,
) -> UploadCoordinator {
    let chunker = Chunker::from_bytes(data, chunk_size).unwrap();
    UploadCoordinator::with_upload_id(
        upload_id,
        chunker,
        "report.bin",
        "application/octet-stream",
        transport,
        fast_options(chunk_size),
    )
}

#[tokio::test]
async fn test_five_mib_resume_scenario() {
    let harness = Harness::new().await;
    let data = file_data(5 * MIB, 7);
    let chunker = Chunker::from_bytes(data.clone(), 2 * MIB as u64).unwrap();

    let plan: Vec<u64> = chunker.plan().spans().map(|s| s.len).collect();
    assert_eq!(plan, vec![2 * MIB as u64, 2 * MIB as u64, MIB as u64]);

    // A previous process stored chunks 0 and 2, then died
    let local = harness.local();
    send_raw(&local, &chunker, "scenario", "report.bin", 0).await;
    send_raw(&local, &chunker, "scenario", "report.bin", 2).await;

    let resume = local.check_chunks("scenario", 3).await.unwrap();
    assert_eq!(resume.uploaded.iter().copied().collect::<Vec<_>>(), vec![0, 2]);

    let faulty = Arc::new(FaultyTransport::new(local.clone()));
    let coord = coordinator("scenario", data.clone(), 2 * MIB as u64, faulty.clone());
    let url = match coord.run().await.unwrap() {
        UploadOutcome::Completed { url } => url,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(faulty.sends_for("scenario"), vec![1]);
    assert_eq!(url, "http://localhost:3000/files/scenario/report.bin");
    assert_eq!(harness.published("scenario", "report.bin").await, data);

    // Merge again: same URL, nothing reassembled
    let again = local
        .merge(&MergeRequest {
            upload_id: "scenario".into(),
            file_name: "report.bin".into(),
            file_type: "application/octet-stream".into(),
            expected_checksum: None,
        })
        .await
        .unwrap();
    assert_eq!(again, url);
}

#[tokio::test]
async fn test_empty_file_publishes_empty_object() {
    let harness = Harness::new().await;
    let faulty = Arc::new(FaultyTransport::new(harness.local()));

    let coord = coordinator("empty", Vec::new(), 4 * 1024, faulty.clone());
    assert_eq!(coord.manifest().total_chunks, 1);

    let url = match coord.run().await.unwrap() {
        UploadOutcome::Completed { url } => url,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(url, "http://localhost:3000/files/empty/report.bin");
    assert_eq!(faulty.sends_for("empty"), vec![0]);
    assert!(harness.published("empty", "report.bin").await.is_empty());
    assert_eq!(coord.progress().percent, 100);

    let session = harness.service.session("empty").await.unwrap().unwrap();
    assert_eq!(session.total_size, 0);
    assert_eq!(session.final_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn test_interrupted_before_merge_resends_nothing() {
    let harness = Harness::new().await;
    let faulty = Arc::new(FaultyTransport::new(harness.local()));
    faulty.merge_unavailable.store(true, Ordering::SeqCst);

    let data = file_data(100_000, 3);
    let coord = coordinator("interrupted", data.clone(), 16 * 1024, faulty.clone());

    let err = coord.run().await.unwrap_err();
    assert!(err.to_string().contains("Merge failed"), "{err}");
    assert!(matches!(coord.state(), UploadState::Failed { .. }));
    let first_sends = faulty.sends_for("interrupted");
    assert_eq!(first_sends, (0..7).collect::<Vec<_>>());

    // A fresh coordinator, as after a client restart
    faulty.merge_unavailable.store(false, Ordering::SeqCst);
    let resumed = coordinator("interrupted", data.clone(), 16 * 1024, faulty.clone());
    let mut events = resumed.take_events().unwrap();
    assert!(matches!(
        resumed.run().await.unwrap(),
        UploadOutcome::Completed { .. }
    ));

    assert_eq!(faulty.sends_for("interrupted"), first_sends);
    let mut skipped = 0;
    while let Ok(event) = events.try_recv() {
        if let UploadEvent::ChunkComplete { skipped: true, .. } = event {
            skipped += 1;
        }
    }
    assert_eq!(skipped, 7);
    assert_eq!(harness.published("interrupted", "report.bin").await, data);
}

#[tokio::test]
async fn test_reverse_order_matches_forward_order() {
    let harness = Harness::new().await;
    let local = harness.local();
    let data = file_data(50_000, 11);
    let chunker = Chunker::from_bytes(data.clone(), 8 * 1024).unwrap();
    let total = chunker.plan().total_chunks();

    for index in (0..total).rev() {
        send_raw(&local, &chunker, "reverse", "report.bin", index).await;
    }
    for index in 0..total {
        send_raw(&local, &chunker, "forward", "report.bin", index).await;
    }

    let merge = |id: &str| MergeRequest {
        upload_id: id.to_string(),
        file_name: "report.bin".into(),
        file_type: "application/octet-stream".into(),
        expected_checksum: Some(IntegrityVerifier::checksum_hex(&data)),
    };
    let reverse = harness.service.merge(merge("reverse")).await.unwrap();
    let forward = harness.service.merge(merge("forward")).await.unwrap();

    assert_eq!(reverse.checksum, forward.checksum);
    assert_eq!(reverse.size, data.len() as u64);
    assert_eq!(
        harness.published("reverse", "report.bin").await,
        harness.published("forward", "report.bin").await
    );
}

#[tokio::test]
async fn test_merge_with_missing_chunk_publishes_nothing() {
    let harness = Harness::new().await;
    let local = harness.local();
    let chunker = Chunker::from_bytes(file_data(30_000, 5), 10_000).unwrap();

    send_raw(&local, &chunker, "gappy", "report.bin", 0).await;
    send_raw(&local, &chunker, "gappy", "report.bin", 2).await;

    let err = harness
        .service
        .merge(MergeRequest {
            upload_id: "gappy".into(),
            file_name: "report.bin".into(),
            file_type: "application/octet-stream".into(),
            expected_checksum: None,
        })
        .await
        .unwrap_err();
    match err {
        ServiceError::Incomplete { missing, .. } => assert_eq!(missing, vec![1]),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!harness.service.publisher().exists("gappy", "report.bin").await);

    // The stored chunks survive and the upload can still finish
    send_raw(&local, &chunker, "gappy", "report.bin", 1).await;
    let resume = local.check_chunks("gappy", 3).await.unwrap();
    assert_eq!(resume.uploaded.len(), 3);
}

#[tokio::test]
async fn test_progress_is_monotonic_across_resume() {
    let harness = Harness::new().await;
    let local = harness.local();
    let data = file_data(64 * 1024, 9);
    let chunker = Chunker::from_bytes(data.clone(), 4 * 1024).unwrap();
    for index in [3, 7, 8, 15] {
        send_raw(&local, &chunker, "monotonic", "report.bin", index).await;
    }

    let transport: Arc<dyn UploadTransport> = Arc::new(local);
    let coord = UploadCoordinator::with_upload_id(
        "monotonic",
        chunker,
        "report.bin",
        "application/octet-stream",
        transport,
        UploadOptions {
            concurrency: 4,
            ..fast_options(4 * 1024)
        },
    );
    let mut events = coord.take_events().unwrap();
    coord.run().await.unwrap();

    let mut percents = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let UploadEvent::Progress { percent, .. } = event {
            percents.push(percent);
        }
    }
    assert_eq!(percents.len(), 16);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(harness.published("monotonic", "report.bin").await, data);
}

#[tokio::test]
async fn test_failing_file_leaves_sibling_untouched() {
    let harness = Harness::new().await;
    let faulty = Arc::new(FaultyTransport::new(harness.local()));
    faulty.poisoned_files.lock().insert("bad.bin".to_string());

    let manager = UploadManager::new(faulty.clone(), fast_options(1000));
    let good_data = file_data(4500, 1);
    let good = manager
        .add_bytes("good.bin", "application/octet-stream", good_data.clone())
        .unwrap();
    let bad = manager
        .add_bytes("bad.bin", "application/octet-stream", file_data(4500, 2))
        .unwrap();
    assert_eq!(manager.start_all(), 2);

    assert!(matches!(
        manager.wait(&bad).await,
        Err(ManagerError::Failed { .. })
    ));
    let outcome = manager.wait(&good).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed { .. }));

    assert_eq!(manager.status(&good).unwrap().percent, 100);
    assert_eq!(faulty.sends_for(&good), vec![0, 1, 2, 3, 4]);
    assert_eq!(harness.published(&good, "good.bin").await, good_data);

    // Retry the failed file once the fault clears: chunk 0 is not sent again
    faulty.poisoned_files.lock().clear();
    manager.retry(&bad).unwrap();
    assert!(manager.wait(&bad).await.is_ok());
    assert_eq!(faulty.sends_for(&bad), vec![0, 1, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_cancelled_upload_never_merges() {
    let harness = Harness::new().await;
    let faulty = Arc::new(
        FaultyTransport::new(harness.local()).with_send_delay(Duration::from_millis(10)),
    );
    let coord = Arc::new(coordinator("cancelled", file_data(40_000, 4), 1000, faulty.clone()));
    let mut events = coord.take_events().unwrap();

    let task = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.run().await })
    };
    while let Some(event) = events.recv().await {
        if matches!(event, UploadEvent::ChunkComplete { .. }) {
            coord.cancel();
            break;
        }
    }

    assert_eq!(task.await.unwrap().unwrap(), UploadOutcome::Cancelled);
    assert!(faulty.sends_for("cancelled").len() < 40);
    let session = harness.service.session("cancelled").await.unwrap().unwrap();
    assert!(session.final_url.is_none());
    assert!(!harness.service.publisher().exists("cancelled", "report.bin").await);
}

#[tokio::test]
async fn test_upload_over_http() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let harness = Harness::with_public_url(&base_url).await;

    let app = create_api_server(harness.service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let http = HttpTransport::new(&base_url).unwrap();
    let data = file_data(300_000, 21);
    let coord = coordinator("over-http", data.clone(), 64 * 1024, Arc::new(http.clone()));
    let url = match coord.run().await.unwrap() {
        UploadOutcome::Completed { url } => url,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(url, format!("{base_url}/files/over-http/report.bin"));

    let fetched = reqwest::get(&url).await.unwrap().bytes().await.unwrap();
    assert_eq!(fetched.as_ref(), data.as_slice());

    // A completed session reports every chunk so a restarted client skips them all
    let resume = http.check_chunks("over-http", 5).await.unwrap();
    assert_eq!(resume.uploaded.len(), 5);
    assert!(resume.is_completed());
    assert_eq!(resume.url.as_deref(), Some(url.as_str()));

    let unknown = http.check_chunks("never-seen", 2).await.unwrap();
    assert!(unknown.uploaded.is_empty());
}

#[tokio::test]
async fn test_presigned_upload_over_http() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let harness = Harness::with_public_url(&base_url).await;

    let app = create_api_server(harness.service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let http = HttpTransport::new(&base_url).unwrap();
    let body = Bytes::from_static(b"hello presigned world");
    let url = http
        .upload_presigned("hello.txt", "text/plain", body.clone())
        .await
        .unwrap();
    assert!(url.ends_with("/hello.txt"), "{url}");

    let fetched = reqwest::get(&url).await.unwrap().bytes().await.unwrap();
    assert_eq!(fetched, body);
}

//! Stress tests: many uploads at once over a lossy link, and racing writers and
//! mergers on a single upload.
//!
//! Run with: cargo test --test stress_tests -- --nocapture

#[path = "simulation/mod.rs"]
mod simulation;

use bytes::Bytes;
use futures::future::join_all;
use resumable_upload::assembler::MergeRequest;
use resumable_upload::chunk::Chunker;
use resumable_upload::config::ServerConfig;
use resumable_upload::coordinator::{UploadOptions, UploadOutcome};
use resumable_upload::integrity::IntegrityVerifier;
use resumable_upload::manager::UploadManager;
use resumable_upload::server::{ChunkSubmission, UploadService};
use resumable_upload::transport::{LocalTransport, RetryPolicy, UploadTransport};
use simulation::{LossyTransport, LossyTransportConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

async fn service(dir: &TempDir) -> Arc<UploadService> {
    let config = ServerConfig {
        chunk_dir: dir.path().join("chunks"),
        objects_dir: dir.path().join("objects"),
        database_url: format!("sqlite://{}", dir.path().join("uploads.db").display()),
        ..ServerConfig::default()
    };
    Arc::new(UploadService::from_config(config).await.unwrap())
}

fn test_data(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i + seed * 1000) % 256) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_over_lossy_link() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir).await;
    let lossy = Arc::new(LossyTransport::new(
        Arc::new(LocalTransport::new(service.clone())),
        LossyTransportConfig::flaky(),
    ));

    let options = UploadOptions {
        chunk_size: 16 * 1024,
        concurrency: 4,
        retry: RetryPolicy {
            max_attempts: 12,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        },
        ..UploadOptions::default()
    };
    let manager = UploadManager::new(lossy.clone(), options);

    let mut files = Vec::new();
    for n in 0..8 {
        let data = test_data(50_000 + n * 30_000, n);
        let name = format!("file_{n}.bin");
        let id = manager
            .add_bytes(&name, "application/octet-stream", data.clone())
            .unwrap();
        files.push((id, name, data));
    }

    let start = Instant::now();
    assert_eq!(manager.start_all(), files.len());
    let results = manager.wait_all().await;
    let elapsed = start.elapsed();

    for (id, result) in &results {
        assert!(
            matches!(result, Ok(UploadOutcome::Completed { .. })),
            "{id}: {result:?}"
        );
    }
    for (id, name, data) in &files {
        let path = service.publisher().object_path(id, name);
        let published = tokio::fs::read(path).await.unwrap();
        assert_eq!(
            IntegrityVerifier::calculate_checksum(&published),
            IntegrityVerifier::calculate_checksum(data),
            "{name} differs"
        );
    }
    assert_eq!(manager.aggregate_progress(), 100.0);

    let stats = lossy.stats();
    println!("\n=== Lossy link stress ===");
    println!("  Files:          {}", files.len());
    println!("  Requests:       {}", stats.requests.load(std::sync::atomic::Ordering::Relaxed));
    println!("  Faults:         {}", stats.faults());
    println!("  Elapsed:        {elapsed:?}");
    assert!(stats.faults() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_chunk_writes_to_one_upload() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir).await;
    let data = test_data(64 * 4096 + 123, 3);
    let chunker = Chunker::from_bytes(data.clone(), 4096).unwrap();
    let total = chunker.plan().total_chunks();
    assert_eq!(total, 65);

    // Every index twice, all at once: overwrites are idempotent
    let writes = (0..total).chain(0..total).map(|index| {
        let service = service.clone();
        let chunker = chunker.clone();
        async move {
            let chunk = chunker.read_chunk("parallel", index).await.unwrap();
            service
                .accept_chunk(ChunkSubmission {
                    upload_id: "parallel".into(),
                    index,
                    total_chunks: total,
                    file_name: "big.bin".into(),
                    file_type: "application/octet-stream".into(),
                    file_size: chunker.plan().total_size(),
                    chunk_size: Some(4096),
                    checksum: Some(chunk.metadata.checksum),
                    data: chunk.data,
                })
                .await
        }
    });
    let tasks: Vec<_> = writes.map(tokio::spawn).collect();
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let resume = LocalTransport::new(service.clone())
        .check_chunks("parallel", total)
        .await
        .unwrap();
    assert_eq!(resume.uploaded.len(), total as usize);

    let outcome = service
        .merge(MergeRequest {
            upload_id: "parallel".into(),
            file_name: "big.bin".into(),
            file_type: "application/octet-stream".into(),
            expected_checksum: Some(IntegrityVerifier::checksum_hex(&data)),
        })
        .await
        .unwrap();
    assert_eq!(outcome.size, data.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_merges_assemble_once() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir).await;
    let data = Bytes::from(test_data(200_000, 9));
    let chunker = Chunker::from_bytes(data.clone(), 32 * 1024).unwrap();
    let local = LocalTransport::new(service.clone());
    let manifest = chunker.manifest("racing", "race.bin", "application/octet-stream");

    for index in 0..chunker.plan().total_chunks() {
        let chunk = chunker.read_chunk("racing", index).await.unwrap();
        local
            .send_chunk(&resumable_upload::transport::ChunkUpload::new(&manifest, chunk))
            .await
            .unwrap();
    }

    let merges = (0..8).map(|_| {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .merge(MergeRequest {
                    upload_id: "racing".into(),
                    file_name: "race.bin".into(),
                    file_type: "application/octet-stream".into(),
                    expected_checksum: None,
                })
                .await
        })
    });
    let outcomes: Vec<_> = join_all(merges)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let assembled = outcomes.iter().filter(|o| !o.already_completed).count();
    assert_eq!(assembled, 1);
    assert!(outcomes.iter().all(|o| o.url == outcomes[0].url));

    let published = tokio::fs::read(service.publisher().object_path("racing", "race.bin"))
        .await
        .unwrap();
    assert_eq!(published, data.as_ref());
}

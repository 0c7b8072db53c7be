//! Metrics recorder for upload operations
//!
//! Server-side metrics cover chunk storage, merges and session expiry; client-side
//! metrics cover chunk transfers and whole-file uploads.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Server: chunk store
    describe_counter!("upload_chunks_stored_total", "Chunks durably stored");
    describe_counter!("upload_bytes_stored_total", "Chunk bytes durably stored");
    describe_counter!(
        "upload_chunks_rejected_total",
        "Chunks rejected by validation"
    );

    // Server: assembly
    describe_counter!("upload_merges_completed_total", "Merges that published an object");
    describe_counter!("upload_merges_failed_total", "Merges that did not publish");
    describe_histogram!("upload_merge_duration_seconds", "Time to assemble and publish");
    describe_counter!(
        "upload_sessions_expired_total",
        "Sessions removed by garbage collection"
    );

    // Client: transfers
    describe_counter!("upload_chunks_sent_total", "Chunks sent by the client");
    describe_counter!(
        "upload_chunks_skipped_total",
        "Chunks skipped because the server already had them"
    );
    describe_counter!("upload_chunk_retries_total", "Chunk send retries");
    describe_histogram!(
        "upload_chunk_transfer_duration_seconds",
        "Time to send a single chunk"
    );

    // Client: uploads
    describe_counter!("upload_uploads_started_total", "Uploads started");
    describe_counter!("upload_uploads_completed_total", "Uploads completed");
    describe_counter!("upload_uploads_failed_total", "Uploads that failed");
    describe_counter!("upload_uploads_cancelled_total", "Uploads cancelled");
    describe_gauge!("upload_active_uploads", "Uploads currently running");
    describe_histogram!("upload_duration_seconds", "Whole-file upload duration");
}

// ============== Server ==============

/// Record a chunk accepted into the store
pub fn record_chunk_stored(size: u64) {
    counter!("upload_chunks_stored_total").increment(1);
    counter!("upload_bytes_stored_total").increment(size);
}

/// Record a chunk rejected by validation
pub fn record_chunk_rejected(reason: &'static str) {
    counter!("upload_chunks_rejected_total", "reason" => reason).increment(1);
}

/// Record a merge that published the final object
pub fn record_merge_complete(duration: Duration, size: u64) {
    counter!("upload_merges_completed_total").increment(1);
    counter!("upload_merged_bytes_total").increment(size);
    histogram!("upload_merge_duration_seconds").record(duration.as_secs_f64());
}

/// Record a merge that did not publish
pub fn record_merge_failed(reason: &'static str) {
    counter!("upload_merges_failed_total", "reason" => reason).increment(1);
}

pub fn record_sessions_expired(count: usize) {
    counter!("upload_sessions_expired_total").increment(count as u64);
}

// ============== Client ==============

/// Record a chunk acknowledged by the server
pub fn record_chunk_sent(size: u64, duration: Duration) {
    counter!("upload_chunks_sent_total").increment(1);
    counter!("upload_bytes_sent_total").increment(size);
    histogram!("upload_chunk_transfer_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_chunks_skipped(count: usize) {
    counter!("upload_chunks_skipped_total").increment(count as u64);
}

pub fn record_chunk_retry() {
    counter!("upload_chunk_retries_total").increment(1);
}

/// Times one run of an upload coordinator.
///
/// Dropping it without calling one of the finishing methods still releases the
/// active-uploads gauge.
pub struct UploadMetrics {
    start_time: Instant,
    bytes_sent: u64,
    finished: bool,
}

impl UploadMetrics {
    pub fn start(file_size: u64) -> Self {
        counter!("upload_uploads_started_total").increment(1);
        gauge!("upload_active_uploads").increment(1.0);
        histogram!("upload_file_size_bytes").record(file_size as f64);

        Self {
            start_time: Instant::now(),
            bytes_sent: 0,
            finished: false,
        }
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_sent += bytes;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Bytes per second sent during this run
    pub fn throughput(&self) -> f64 {
        let secs = self.start_time.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_sent as f64 / secs
        } else {
            0.0
        }
    }

    pub fn complete(mut self) {
        counter!("upload_uploads_completed_total").increment(1);
        histogram!("upload_duration_seconds").record(self.elapsed().as_secs_f64());
        self.finish();
    }

    pub fn fail(mut self, reason: &'static str) {
        counter!("upload_uploads_failed_total", "reason" => reason).increment(1);
        self.finish();
    }

    pub fn cancel(mut self) {
        counter!("upload_uploads_cancelled_total").increment(1);
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            gauge!("upload_active_uploads").decrement(1.0);
        }
    }
}

impl Drop for UploadMetrics {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Times one chunk send
pub struct ChunkTimer {
    start_time: Instant,
}

impl ChunkTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn stop(self, size: u64) {
        record_chunk_sent(size, self.start_time.elapsed());
    }
}

//! Simulated unreliable link in front of an [`UploadTransport`].

#![allow(dead_code)]

use async_trait::async_trait;
use rand::Rng;
use resumable_upload::assembler::MergeRequest;
use resumable_upload::transport::{
    ChunkUpload, ResumeState, TransportError, TransportResult, UploadTransport,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct LossyTransportConfig {
    /// Chance a request never reaches the server (0.0 - 1.0)
    pub loss_rate: f32,
    /// Chance the server handles the request but the response is lost
    pub response_loss_rate: f32,
    /// Chance of a 503 before the server sees the request
    pub server_error_rate: f32,
    pub latency_ms: u64,
    pub jitter_ms: u64,
}

impl Default for LossyTransportConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            response_loss_rate: 0.0,
            server_error_rate: 0.0,
            latency_ms: 0,
            jitter_ms: 0,
        }
    }
}

impl LossyTransportConfig {
    /// Flaky mobile link
    pub fn flaky() -> Self {
        Self {
            loss_rate: 0.15,
            response_loss_rate: 0.05,
            server_error_rate: 0.05,
            latency_ms: 1,
            jitter_ms: 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct LinkStats {
    pub requests: AtomicU64,
    pub dropped: AtomicU64,
    pub responses_lost: AtomicU64,
    pub server_errors: AtomicU64,
}

impl LinkStats {
    pub fn faults(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
            + self.responses_lost.load(Ordering::Relaxed)
            + self.server_errors.load(Ordering::Relaxed)
    }
}

pub struct LossyTransport {
    inner: Arc<dyn UploadTransport>,
    config: LossyTransportConfig,
    stats: LinkStats,
}

fn roll(rate: f32) -> bool {
    rate > 0.0 && rand::thread_rng().gen::<f32>() < rate
}

impl LossyTransport {
    pub fn new(inner: Arc<dyn UploadTransport>, config: LossyTransportConfig) -> Self {
        Self {
            inner,
            config,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    async fn delay(&self) {
        if self.config.latency_ms == 0 && self.config.jitter_ms == 0 {
            return;
        }
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        sleep(Duration::from_millis(self.config.latency_ms + jitter)).await;
    }

    async fn through<T, Fut>(&self, call: Fut) -> TransportResult<T>
    where
        Fut: Future<Output = TransportResult<T>>,
    {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        if roll(self.config.loss_rate) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Network("request dropped".into()));
        }
        if roll(self.config.server_error_rate) {
            self.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Server {
                status: 503,
                message: "service unavailable".into(),
            });
        }

        let result = call.await;
        if result.is_ok() && roll(self.config.response_loss_rate) {
            self.stats.responses_lost.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Network("connection reset".into()));
        }
        result
    }
}

#[async_trait]
impl UploadTransport for LossyTransport {
    async fn send_chunk(&self, chunk: &ChunkUpload) -> TransportResult<()> {
        self.through(self.inner.send_chunk(chunk)).await
    }

    async fn check_chunks(&self, upload_id: &str, total_chunks: u32) -> TransportResult<ResumeState> {
        self.through(self.inner.check_chunks(upload_id, total_chunks))
            .await
    }

    async fn merge(&self, request: &MergeRequest) -> TransportResult<String> {
        self.through(self.inner.merge(request)).await
    }
}

//! Metrics and observability
//!
//! Prometheus-compatible metrics for the upload server and client:
//! - chunks stored, rejected, sent, skipped and retried
//! - merge outcomes and durations
//! - upload outcomes, durations and the active-upload gauge
//! - expired sessions

pub mod exporter;
pub mod recorder;

pub use exporter::{install_recorder, metrics_route, render_metrics, MetricsError};
pub use recorder::{init_metrics, ChunkTimer, UploadMetrics};

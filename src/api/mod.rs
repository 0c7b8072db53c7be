mod error;
mod rest;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use rest::RestApi;
pub use types::*;

use crate::metrics::metrics_route;
use crate::server::UploadService;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Room for the multipart envelope and text fields around a chunk.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Create the complete upload server: protocol routes, published files and metrics.
pub fn create_api_server(service: Arc<UploadService>) -> Router {
    let body_limit = service
        .config()
        .max_chunk_size
        .saturating_add(MULTIPART_OVERHEAD)
        .min(usize::MAX as u64) as usize;
    let files = ServeDir::new(service.publisher().published_dir());
    let rest_api = RestApi::new(service);

    // Browsers upload straight from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(rest_api.router())
        .route("/metrics", metrics_route())
        .nest_service("/files", files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

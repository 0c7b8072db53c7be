use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::assembler::MergeRequest;
use crate::server::{ChunkSubmission, UploadService};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use std::str::FromStr;
use std::sync::Arc;

pub struct RestApi {
    service: Arc<UploadService>,
}

impl RestApi {
    pub fn new(service: Arc<UploadService>) -> Self {
        Self { service }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/chunk", post(upload_chunk))
            .route("/check-chunks", post(check_chunks))
            .route("/merge", post(merge))
            // Presigned variant
            .route("/presign", post(presign))
            .route("/presigned/:file_id", put(put_presigned))
            .route("/upload-presigned", post(upload_presigned))
            // Session administration
            .route("/uploads/:file_id", get(get_upload).delete(delete_upload))
            .with_state(self.service.clone())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::Service(crate::server::ServiceError::TooLarge(e.body_text()))
    } else {
        ApiError::InvalidRequest(format!("Failed to read multipart field: {}", e.body_text()))
    }
}

fn parse_field<T: FromStr>(name: &str, value: Option<String>) -> ApiResult<T> {
    let value = value.ok_or_else(|| ApiError::InvalidRequest(format!("Missing field `{name}`")))?;
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidRequest(format!("Invalid value for `{name}`: {value}")))
}

async fn upload_chunk(
    State(service): State<Arc<UploadService>>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkResponse>> {
    let mut data: Option<Bytes> = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut file_name = None;
    let mut file_id = None;
    let mut file_size = None;
    let mut file_type = None;
    let mut chunk_size = None;
    let mut checksum = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        if name == fields::CHUNK {
            data = Some(field.bytes().await.map_err(multipart_error)?);
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            fields::CHUNK_INDEX => chunk_index = Some(value),
            fields::TOTAL_CHUNKS => total_chunks = Some(value),
            fields::FILE_NAME => file_name = Some(value),
            fields::FILE_ID => file_id = Some(value),
            fields::FILE_SIZE => file_size = Some(value),
            fields::FILE_TYPE => file_type = Some(value),
            fields::CHUNK_SIZE => chunk_size = Some(value),
            fields::CHECKSUM => checksum = Some(value),
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::InvalidRequest("Missing field `chunk`".to_string()))?;
    let submission = ChunkSubmission {
        upload_id: parse_field(fields::FILE_ID, file_id)?,
        index: parse_field(fields::CHUNK_INDEX, chunk_index)?,
        total_chunks: parse_field(fields::TOTAL_CHUNKS, total_chunks)?,
        file_name: parse_field(fields::FILE_NAME, file_name)?,
        file_type: file_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        file_size: parse_field(fields::FILE_SIZE, file_size)?,
        chunk_size: match chunk_size.filter(|s| !s.trim().is_empty()) {
            Some(value) => Some(parse_field(fields::CHUNK_SIZE, Some(value))?),
            None => None,
        },
        checksum: checksum.filter(|c| !c.trim().is_empty()),
        data,
    };

    let receipt = service.accept_chunk(submission).await?;
    Ok(Json(ChunkResponse {
        file_id: receipt.upload_id,
        chunk_index: receipt.index,
        size: receipt.size,
        checksum: receipt.checksum,
        stored: receipt.stored,
    }))
}

async fn check_chunks(
    State(service): State<Arc<UploadService>>,
    Json(req): Json<CheckChunksRequest>,
) -> ApiResult<Json<CheckChunksResponse>> {
    let state = service.check_chunks(&req.file_id, req.total_chunks).await?;
    Ok(Json(CheckChunksResponse {
        uploaded_chunks: state.uploaded.into_iter().collect(),
        status: state.status,
        url: state.url,
    }))
}

async fn merge(
    State(service): State<Arc<UploadService>>,
    Json(req): Json<MergeRequestBody>,
) -> ApiResult<Json<MergeResponse>> {
    let outcome = service
        .merge(MergeRequest {
            upload_id: req.file_id,
            file_name: req.file_name,
            file_type: req.file_type,
            expected_checksum: req.checksum,
        })
        .await?;

    Ok(Json(MergeResponse {
        url: outcome.url,
        checksum: Some(outcome.checksum),
        size: Some(outcome.size),
    }))
}

async fn presign(
    State(service): State<Arc<UploadService>>,
    Json(req): Json<PresignRequest>,
) -> ApiResult<(StatusCode, Json<PresignResponse>)> {
    let grant = service
        .presign(&req.file_name, req.file_type.as_deref(), req.file_size)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PresignResponse {
            url: grant.url,
            file_id: grant.upload_id,
            expires_at: grant.expires_at,
        }),
    ))
}

async fn put_presigned(
    State(service): State<Arc<UploadService>>,
    Path(file_id): Path<String>,
    Query(query): Query<PresignedQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<MergeResponse>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let outcome = service
        .put_presigned(&file_id, &query.token, content_type, body)
        .await?;

    Ok(Json(MergeResponse {
        url: outcome.url,
        checksum: Some(outcome.checksum),
        size: Some(outcome.size),
    }))
}

async fn upload_presigned(
    State(service): State<Arc<UploadService>>,
    Json(req): Json<UploadPresignedRequest>,
) -> ApiResult<Json<UrlResponse>> {
    let url = service
        .confirm_presigned(&req.file_id, &req.file_name)
        .await?;
    Ok(Json(UrlResponse { url }))
}

async fn get_upload(
    State(service): State<Arc<UploadService>>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let session = service
        .session(&file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(file_id.clone()))?;
    Ok(Json(session.into()))
}

async fn delete_upload(
    State(service): State<Arc<UploadService>>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    if !service.delete_session(&file_id).await? {
        return Err(ApiError::NotFound(file_id));
    }
    Ok(Json(DeleteResponse {
        file_id,
        deleted: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ObjectPublisher;
    use crate::config::ServerConfig;
    use crate::integrity::IntegrityVerifier;
    use crate::session::SessionStore;
    use crate::store::MemoryChunkStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::Service;

    const BOUNDARY: &str = "----upload-test-boundary";

    async fn create_test_api() -> (TempDir, RestApi) {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::new_in_memory().await.unwrap());
        let publisher = ObjectPublisher::new(dir.path(), "http://localhost:3000")
            .await
            .unwrap();
        let service = UploadService::new(
            ServerConfig::default(),
            Arc::new(MemoryChunkStore::new()),
            sessions,
            publisher,
        );
        (dir, RestApi::new(Arc::new(service)))
    }

    fn chunk_request(file_id: &str, index: u32, total: u32, size: u64, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        let text_fields = [
            (fields::FILE_ID, file_id.to_string()),
            (fields::CHUNK_INDEX, index.to_string()),
            (fields::TOTAL_CHUNKS, total.to_string()),
            (fields::FILE_NAME, "notes.txt".to_string()),
            (fields::FILE_SIZE, size.to_string()),
            (fields::FILE_TYPE, "text/plain".to_string()),
            (fields::CHECKSUM, IntegrityVerifier::checksum_hex(data)),
        ];
        for (name, value) in text_fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/chunk")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, api) = create_test_api().await;
        let mut app = api.router();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_check_chunks_unknown_is_empty() {
        let (_dir, api) = create_test_api().await;
        let mut app = api.router();

        let response = app
            .call(json_request(
                "/check-chunks",
                serde_json::json!({"fileId": "never-seen", "totalChunks": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: CheckChunksResponse = body_json(response).await;
        assert!(body.uploaded_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_resume_and_merge_flow() {
        let (_dir, api) = create_test_api().await;
        let mut app = api.router();

        let response = app
            .call(chunk_request("f1", 1, 2, 9, b"world"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let receipt: ChunkResponse = body_json(response).await;
        assert!(receipt.stored);
        assert_eq!(receipt.chunk_index, 1);

        let response = app
            .call(json_request(
                "/check-chunks",
                serde_json::json!({"fileId": "f1", "totalChunks": 2}),
            ))
            .await
            .unwrap();
        let resume: CheckChunksResponse = body_json(response).await;
        assert_eq!(resume.uploaded_chunks, vec![1]);

        let merge_body = serde_json::json!({"fileId": "f1", "fileName": "notes.txt", "fileType": "text/plain"});
        let response = app
            .call(json_request("/merge", merge_body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.code, INCOMPLETE_SESSION_CODE);
        assert_eq!(error.missing_chunks, Some(vec![0]));

        let response = app.call(chunk_request("f1", 0, 2, 9, b"hell")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.call(json_request("/merge", merge_body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let merged: MergeResponse = body_json(response).await;
        assert_eq!(merged.url, "http://localhost:3000/files/f1/notes.txt");
        assert_eq!(merged.size, Some(9));
    }

    #[tokio::test]
    async fn test_bad_chunk_is_client_error() {
        let (_dir, api) = create_test_api().await;
        let mut app = api.router();

        let response = app
            .call(chunk_request("f1", 5, 2, 9, b"data"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_get_and_delete_upload() {
        let (_dir, api) = create_test_api().await;
        let mut app = api.router();

        let request = Request::builder()
            .uri("/uploads/nonexistent-id")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.call(chunk_request("f2", 0, 1, 3, b"abc")).await.unwrap();

        let request = Request::builder()
            .uri("/uploads/f2")
            .body(Body::empty())
            .unwrap();
        let session: SessionResponse = body_json(app.call(request).await.unwrap()).await;
        assert_eq!(session.file_name, "notes.txt");
        assert_eq!(session.total_chunks, 1);

        let request = Request::builder()
            .method("DELETE")
            .uri("/uploads/f2")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_presigned_roundtrip() {
        let (_dir, api) = create_test_api().await;
        let mut app = api.router();

        let response = app
            .call(json_request(
                "/presign",
                serde_json::json!({"fileName": "a.txt", "fileType": "text/plain", "fileSize": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let grant: PresignResponse = body_json(response).await;
        let path = grant.url.trim_start_matches("http://localhost:3000").to_string();

        let request = Request::builder()
            .method("PUT")
            .uri(format!("/presigned/{}?token=wrong", grant.file_id))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hi"))
            .unwrap();
        assert_eq!(app.call(request).await.unwrap().status(), StatusCode::FORBIDDEN);

        let request = Request::builder()
            .method("PUT")
            .uri(path)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hi"))
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored: MergeResponse = body_json(response).await;

        let response = app
            .call(json_request(
                "/upload-presigned",
                serde_json::json!({"fileId": grant.file_id, "fileName": "a.txt"}),
            ))
            .await
            .unwrap();
        let confirmed: UrlResponse = body_json(response).await;
        assert_eq!(confirmed.url, stored.url);
    }
}

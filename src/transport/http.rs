use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::error::{TransportError, TransportResult};
use super::types::{ChunkUpload, ResumeState};
use super::UploadTransport;
use crate::api::types::{
    fields, CheckChunksRequest, CheckChunksResponse, ErrorResponse, MergeRequestBody,
    MergeResponse, PresignRequest, PresignResponse, UploadPresignedRequest, UrlResponse,
    INCOMPLETE_SESSION_CODE,
};
use crate::assembler::MergeRequest;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upload server client over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Protocol(format!("failed to build client: {e}")))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> TransportResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }

    async fn decode<R: DeserializeOwned>(resp: Response) -> TransportResult<R> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }
        resp.json::<R>()
            .await
            .map_err(|e| TransportError::Protocol(format!("invalid response body: {e}")))
    }

    /// Upload a whole file through the presigned flow: presign, PUT, confirm.
    pub async fn upload_presigned(
        &self,
        file_name: &str,
        file_type: &str,
        data: Bytes,
    ) -> TransportResult<String> {
        let grant: PresignResponse = self
            .post_json(
                "/presign",
                &PresignRequest {
                    file_name: file_name.to_string(),
                    file_type: Some(file_type.to_string()),
                    file_size: Some(data.len() as u64),
                },
            )
            .await?;
        debug!(file_id = %grant.file_id, "presigned url issued");

        let resp = self
            .http
            .put(&grant.url)
            .header(CONTENT_TYPE, file_type)
            .body(data)
            .send()
            .await?;
        let _: MergeResponse = Self::decode(resp).await?;

        let confirmed: UrlResponse = self
            .post_json(
                "/upload-presigned",
                &UploadPresignedRequest {
                    file_id: grant.file_id,
                    file_name: file_name.to_string(),
                },
            )
            .await?;
        Ok(confirmed.url)
    }
}

/// Classify a non-2xx response.
fn error_from_response(status: StatusCode, body: &[u8]) -> TransportError {
    let parsed: Option<ErrorResponse> = serde_json::from_slice(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.clone())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    let code = parsed.as_ref().map(|e| e.code.clone());
    let status = status.as_u16();

    if TransportError::is_retriable_status(status) {
        return TransportError::Server { status, message };
    }
    if status == 404 {
        return TransportError::UnknownSession(message);
    }
    if status == 409 && code.as_deref() == Some(INCOMPLETE_SESSION_CODE) {
        return TransportError::Incomplete {
            missing: parsed.and_then(|e| e.missing_chunks).unwrap_or_default(),
            message,
        };
    }
    TransportError::Rejected {
        status,
        code,
        message,
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send_chunk(&self, chunk: &ChunkUpload) -> TransportResult<()> {
        let part = Part::bytes(chunk.data.to_vec())
            .file_name("blob")
            .mime_str("application/octet-stream")
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut form = Form::new()
            .text(fields::FILE_ID, chunk.upload_id.clone())
            .text(fields::CHUNK_INDEX, chunk.index.to_string())
            .text(fields::TOTAL_CHUNKS, chunk.total_chunks.to_string())
            .text(fields::FILE_NAME, chunk.file_name.clone())
            .text(fields::FILE_SIZE, chunk.file_size.to_string())
            .text(fields::FILE_TYPE, chunk.file_type.clone())
            .text(fields::CHECKSUM, chunk.checksum.clone());
        if let Some(chunk_size) = chunk.chunk_size {
            form = form.text(fields::CHUNK_SIZE, chunk_size.to_string());
        }
        let form = form.part(fields::CHUNK, part);

        let resp = self
            .http
            .post(self.url("/chunk"))
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }
        Ok(())
    }

    async fn check_chunks(&self, upload_id: &str, total_chunks: u32) -> TransportResult<ResumeState> {
        let resp: CheckChunksResponse = self
            .post_json(
                "/check-chunks",
                &CheckChunksRequest {
                    file_id: upload_id.to_string(),
                    total_chunks,
                },
            )
            .await?;

        Ok(ResumeState {
            uploaded: resp.uploaded_chunks.into_iter().collect(),
            status: resp.status,
            url: resp.url,
        })
    }

    async fn merge(&self, request: &MergeRequest) -> TransportResult<String> {
        let resp: MergeResponse = self
            .post_json(
                "/merge",
                &MergeRequestBody {
                    file_id: request.upload_id.clone(),
                    file_name: request.file_name.clone(),
                    file_type: request.file_type.clone(),
                    checksum: request.expected_checksum.clone(),
                },
            )
            .await?;
        Ok(resp.url)
    }
}

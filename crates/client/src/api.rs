//! Remote ingest API: the trait the orchestrator drives and its HTTP client.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use bytes::Bytes;
use phx_core::ClientConfig;
use phx_core::job::{CreateIngestJobRequest, IngestJob, IngestJobId};
use phx_core::upload::{
    ChunkAck, CreateUploadRequest, CreateUploadResponse, SourceFile, SourceFileId, UploadId,
};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Operations the orchestrator needs from the ingest backend.
///
/// Every method is a single request: retry policy lives with the caller.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// `POST /uploads/create`
    async fn create_session(&self, request: &CreateUploadRequest)
    -> ApiResult<CreateUploadResponse>;

    /// `PUT /uploads/{id}/chunk?index=N`. Re-sending the same index with the
    /// same bytes is safe.
    async fn upload_chunk(&self, upload_id: UploadId, index: u64, data: Bytes)
    -> ApiResult<ChunkAck>;

    /// `POST /uploads/{id}/finalize`
    async fn finalize(&self, upload_id: UploadId) -> ApiResult<SourceFile>;

    /// `POST /ingest-jobs`
    async fn create_job(&self, source_file_id: SourceFileId) -> ApiResult<IngestJob>;

    /// `GET /ingest-jobs/{id}`
    async fn get_job(&self, job_id: IngestJobId) -> ApiResult<IngestJob>;

    /// `GET /ingest-jobs`, newest first.
    async fn list_jobs(&self) -> ApiResult<Vec<IngestJob>>;
}

/// HTTP implementation of [`IngestApi`].
#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpApi {
    /// Create a client with reqwest's default settings.
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a client with a per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::with_client(base_url, http)
    }

    /// Create a client from the shared configuration.
    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        Self::with_timeout(&config.server_url, config.request_timeout())
    }

    /// Create a client around an existing reqwest client.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> ApiResult<Self> {
        // A trailing slash makes relative joins keep any path prefix.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self { http, base_url })
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ApiResult<T> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            // The status is the error; a body lost in transit only costs detail.
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await.map_err(ApiError::body_read)?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl IngestApi for HttpApi {
    #[tracing::instrument(level = "debug", skip_all, fields(filename = %request.filename))]
    async fn create_session(
        &self,
        request: &CreateUploadRequest,
    ) -> ApiResult<CreateUploadResponse> {
        let url = self.url("uploads/create")?;
        self.send_json(self.http.post(url).json(request)).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(upload_id = %upload_id, index = index, len = data.len()))]
    async fn upload_chunk(
        &self,
        upload_id: UploadId,
        index: u64,
        data: Bytes,
    ) -> ApiResult<ChunkAck> {
        let mut url = self.url(&format!("uploads/{upload_id}/chunk"))?;
        url.query_pairs_mut()
            .append_pair("index", &index.to_string());
        let req = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send_json(req).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(upload_id = %upload_id))]
    async fn finalize(&self, upload_id: UploadId) -> ApiResult<SourceFile> {
        let url = self.url(&format!("uploads/{upload_id}/finalize"))?;
        self.send_json(self.http.post(url)).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(source_file_id = %source_file_id))]
    async fn create_job(&self, source_file_id: SourceFileId) -> ApiResult<IngestJob> {
        let url = self.url("ingest-jobs")?;
        let req = CreateIngestJobRequest { source_file_id };
        self.send_json(self.http.post(url).json(&req)).await
    }

    #[tracing::instrument(level = "trace", skip_all, fields(job_id = %job_id))]
    async fn get_job(&self, job_id: IngestJobId) -> ApiResult<IngestJob> {
        let url = self.url(&format!("ingest-jobs/{job_id}"))?;
        self.send_json(self.http.get(url)).await
    }

    async fn list_jobs(&self) -> ApiResult<Vec<IngestJob>> {
        let url = self.url("ingest-jobs")?;
        self.send_json(self.http.get(url)).await
    }
}

//! Upload session client: opens sessions and validates what the server echoes.

use crate::api::IngestApi;
use crate::error::{ApiError, ApiResult, UploadError};
use bytes::Bytes;
use phx_core::upload::CreateUploadRequest;
use phx_core::{Chunk, ChunkAck, ChunkPlan, SourceFile, UploadId, UploadSession};

/// Session-level operations on top of an [`IngestApi`].
#[derive(Clone, Copy)]
pub struct SessionClient<'a> {
    api: &'a dyn IngestApi,
}

impl<'a> SessionClient<'a> {
    pub fn new(api: &'a dyn IngestApi) -> Self {
        Self { api }
    }

    /// Open a session for `plan`.
    ///
    /// Fails with [`UploadError::SessionCreate`] if the server rejects the
    /// request or echoes metadata that does not match what was asked for.
    pub async fn create(
        &self,
        filename: &str,
        plan: &ChunkPlan,
    ) -> Result<UploadSession, UploadError> {
        let request = CreateUploadRequest {
            filename: filename.to_string(),
            size: plan.total_size(),
            chunk_size: plan.chunk_size(),
            expected_chunks: plan.chunk_count(),
        };

        let response = self
            .api
            .create_session(&request)
            .await
            .map_err(UploadError::SessionCreate)?;

        if response.size != request.size {
            return Err(UploadError::SessionCreate(ApiError::InvalidResponse(
                format!(
                    "server echoed size {} for a {} byte upload",
                    response.size, request.size
                ),
            )));
        }
        if response.completed {
            return Err(UploadError::SessionCreate(ApiError::InvalidResponse(
                format!("session {} is already finalized", response.id),
            )));
        }

        Ok(UploadSession::new(response.id, filename, plan))
    }

    /// Upload one chunk and check the acknowledgment matches it.
    ///
    /// A mismatched acknowledgment is reported as a permanent error.
    pub async fn upload_chunk(
        &self,
        session: &UploadSession,
        chunk: &Chunk,
        data: Bytes,
    ) -> ApiResult<ChunkAck> {
        let ack = self.api.upload_chunk(session.id, chunk.index, data).await?;
        if ack.index != chunk.index || ack.received != chunk.len {
            return Err(ApiError::InvalidResponse(format!(
                "acknowledged chunk {} ({} bytes), sent chunk {} ({} bytes)",
                ack.index, ack.received, chunk.index, chunk.len
            )));
        }
        Ok(ack)
    }

    /// Convert the session into a source file.
    pub async fn finalize(&self, upload_id: UploadId) -> ApiResult<SourceFile> {
        self.api.finalize(upload_id).await
    }
}

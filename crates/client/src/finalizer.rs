//! Finalizer: converts a fully acknowledged session into a source file.

use crate::api::IngestApi;
use crate::error::{ApiError, UploadError};
use crate::scheduler::ChunkUploadOutcome;
use crate::session::SessionClient;
use phx_core::{ContentHash, SourceFile, UploadId};

/// Proof that every expected chunk of a session was acknowledged.
///
/// Only the scheduler can build one, and [`Finalizer::finalize`] consumes it,
/// so a session is finalized at most once and never before its last chunk.
#[derive(Debug)]
pub struct AllChunksAcked {
    upload_id: UploadId,
    outcomes: Vec<ChunkUploadOutcome>,
}

impl AllChunksAcked {
    /// Check that `outcomes` covers `0..expected` exactly once.
    pub(crate) fn verify(
        upload_id: UploadId,
        expected: u64,
        mut outcomes: Vec<ChunkUploadOutcome>,
    ) -> Result<Self, UploadError> {
        outcomes.sort_by_key(|o| o.index);
        for (position, outcome) in outcomes.iter().enumerate() {
            let position = position as u64;
            if outcome.index != position {
                // Either `position` was skipped or the previous index repeats.
                return Err(UploadError::ChunkMissing {
                    index: position.min(outcome.index),
                    expected,
                    acked: outcomes.len() as u64,
                });
            }
        }
        if outcomes.len() as u64 != expected {
            return Err(UploadError::ChunkMissing {
                index: outcomes.len() as u64,
                expected,
                acked: outcomes.len() as u64,
            });
        }
        Ok(Self {
            upload_id,
            outcomes,
        })
    }

    /// The session these chunks belong to.
    pub fn upload_id(&self) -> UploadId {
        self.upload_id
    }

    /// Number of acknowledged chunks.
    pub fn chunk_count(&self) -> u64 {
        self.outcomes.len() as u64
    }

    /// Total bytes acknowledged by the server.
    pub fn bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.received).sum()
    }

    /// Attempts beyond the first, summed over all chunks.
    pub fn retries(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| u64::from(o.attempts.saturating_sub(1)))
            .sum()
    }

    /// Per-chunk outcomes in index order.
    pub fn outcomes(&self) -> &[ChunkUploadOutcome] {
        &self.outcomes
    }
}

/// Issues the single finalize call of a run.
pub struct Finalizer<'a> {
    sessions: SessionClient<'a>,
}

impl<'a> Finalizer<'a> {
    pub fn new(api: &'a dyn IngestApi) -> Self {
        Self {
            sessions: SessionClient::new(api),
        }
    }

    /// Finalize the session. Failures are structural and never retried.
    ///
    /// When `expected_digest` is given, the server's digest of the assembled
    /// file must match it.
    pub async fn finalize(
        &self,
        acked: AllChunksAcked,
        expected_digest: Option<ContentHash>,
    ) -> Result<SourceFile, UploadError> {
        let upload_id = acked.upload_id();
        tracing::info!(
            upload_id = %upload_id,
            chunks = acked.chunk_count(),
            bytes = acked.bytes(),
            "Finalizing upload"
        );

        let source_file = self
            .sessions
            .finalize(upload_id)
            .await
            .map_err(UploadError::Finalize)?;

        if source_file.size != acked.bytes() {
            return Err(UploadError::Finalize(ApiError::InvalidResponse(format!(
                "server assembled {} bytes, uploaded {}",
                source_file.size,
                acked.bytes()
            ))));
        }

        if let Some(expected) = expected_digest
            && expected != source_file.sha256
        {
            return Err(UploadError::ChecksumMismatch {
                expected,
                actual: source_file.sha256,
            });
        }

        tracing::info!(
            upload_id = %upload_id,
            source_file_id = %source_file.id,
            sha256 = %source_file.sha256,
            "Upload finalized"
        );
        Ok(source_file)
    }
}

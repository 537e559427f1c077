//! Ingest job launcher.

use crate::api::IngestApi;
use crate::error::{ApiResult, UploadError};
use phx_core::{IngestJob, IngestJobId, SourceFileId};

/// Launches and inspects ingest jobs.
#[derive(Clone, Copy)]
pub struct JobLauncher<'a> {
    api: &'a dyn IngestApi,
}

impl<'a> JobLauncher<'a> {
    pub fn new(api: &'a dyn IngestApi) -> Self {
        Self { api }
    }

    /// Start one ingest job for a finalized source file.
    ///
    /// Not retried: a second launch would start a second job.
    pub async fn launch(&self, source_file_id: SourceFileId) -> Result<IngestJob, UploadError> {
        let job = self
            .api
            .create_job(source_file_id)
            .await
            .map_err(UploadError::JobLaunch)?;
        if job.is_terminal() {
            tracing::warn!(
                job_id = %job.id,
                status = %job.status,
                "Ingest job reported a terminal status at launch"
            );
        }
        tracing::info!(
            job_id = %job.id,
            source_file_id = %source_file_id,
            status = %job.status,
            "Ingest job launched"
        );
        Ok(job)
    }

    /// Fetch the current state of a job. Safe to call repeatedly.
    pub async fn poll(&self, job_id: IngestJobId) -> ApiResult<IngestJob> {
        self.api.get_job(job_id).await
    }

    /// List all jobs, newest first.
    pub async fn list(&self) -> ApiResult<Vec<IngestJob>> {
        self.api.list_jobs().await
    }
}

//! End-to-end upload run: session, chunks, finalize, ingest job.

use crate::api::IngestApi;
use crate::error::UploadError;
use crate::events::{UploadEvent, UploadObserver, UploadState};
use crate::finalizer::{AllChunksAcked, Finalizer};
use crate::jobs::JobLauncher;
use crate::retry::RetryPolicy;
use crate::scheduler::UploadScheduler;
use crate::session::SessionClient;
use crate::source::{ByteSource, hash_source};
use phx_core::{
    ChunkPlan, ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, IngestJob, SourceFile,
    UploadSession,
};
use std::num::NonZeroU64;
use std::sync::Arc;

/// Tunables for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    pub chunk_size: NonZeroU64,
    /// Number of chunk uploads in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Hash the source before uploading and compare against the server.
    pub verify_checksum: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroU64::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroU64::MIN),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            verify_checksum: true,
        }
    }
}

impl UploadOptions {
    /// Build options from a validated client configuration.
    pub fn from_config(config: &ClientConfig) -> phx_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.chunk_size()?,
            concurrency: config.concurrency,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: config.retry_base_delay(),
            },
            verify_checksum: config.verify_checksum,
        })
    }
}

/// Everything a successful run produced.
#[derive(Clone, Debug)]
pub struct UploadReport {
    pub session: UploadSession,
    pub source_file: SourceFile,
    pub job: IngestJob,
    /// Chunks uploaded.
    pub chunks: u64,
    /// Chunk attempts beyond the first.
    pub retries: u64,
}

/// Tracks the run state and reports every transition.
struct Tracker<'o> {
    state: UploadState,
    observer: &'o dyn UploadObserver,
}

impl<'o> Tracker<'o> {
    fn new(observer: &'o dyn UploadObserver) -> Self {
        Self {
            state: UploadState::Idle,
            observer,
        }
    }

    fn emit(&self, event: UploadEvent) {
        self.observer.on_event(&event);
    }

    fn enter(&mut self, next: UploadState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Ignoring illegal state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Upload state changed");
        self.state = next;
        self.emit(UploadEvent::State(next));
    }

    fn fail(&mut self, err: &UploadError) {
        self.emit(UploadEvent::Failed {
            stage: err.stage(),
            reason: err.to_string(),
        });
        // A failed launch leaves the upload itself finalized.
        if self.state.can_transition_to(UploadState::Failed) {
            self.enter(UploadState::Failed);
        }
    }
}

/// Drives one file through the whole upload flow.
#[derive(Clone)]
pub struct UploadOrchestrator {
    api: Arc<dyn IngestApi>,
    options: UploadOptions,
}

impl UploadOrchestrator {
    pub fn new(api: Arc<dyn IngestApi>, options: UploadOptions) -> Self {
        Self { api, options }
    }

    pub fn api(&self) -> &Arc<dyn IngestApi> {
        &self.api
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload `source` under `filename` and launch an ingest job for it.
    ///
    /// The observer sees `Started`, state changes, progress ticks and
    /// finally either `Completed` or `Failed`. Finalize is called at most
    /// once, and only after every chunk was acknowledged.
    pub async fn run(
        &self,
        source: &dyn ByteSource,
        filename: &str,
        observer: &dyn UploadObserver,
    ) -> Result<UploadReport, UploadError> {
        let mut tracker = Tracker::new(observer);
        let result = self.execute(source, filename, &mut tracker).await;
        if let Err(err) = &result {
            tracing::error!(
                filename,
                stage = %err.stage(),
                error = %err,
                "Upload failed"
            );
            tracker.fail(err);
        }
        result
    }

    async fn execute(
        &self,
        source: &dyn ByteSource,
        filename: &str,
        tracker: &mut Tracker<'_>,
    ) -> Result<UploadReport, UploadError> {
        let api = self.api.as_ref();
        let plan = ChunkPlan::new(source.len(), self.options.chunk_size);
        tracker.emit(UploadEvent::Started {
            filename: filename.to_string(),
            size: plan.total_size(),
            chunks: plan.chunk_count(),
        });

        let digest = if self.options.verify_checksum {
            let digest = hash_source(source, &plan).await?;
            tracing::debug!(filename, sha256 = %digest, "Hashed source");
            Some(digest)
        } else {
            None
        };

        let session = SessionClient::new(api).create(filename, &plan).await?;
        tracing::info!(
            upload_id = %session.id,
            filename,
            size = session.size,
            chunks = session.expected_chunks,
            "Upload session created"
        );
        tracker.enter(UploadState::SessionCreated);
        tracker.emit(UploadEvent::SessionCreated {
            session: session.clone(),
        });

        let acked = if plan.is_empty() {
            tracing::info!(upload_id = %session.id, "Nothing to upload, finalizing empty file");
            AllChunksAcked::verify(session.id, 0, Vec::new())?
        } else {
            tracker.enter(UploadState::Uploading);
            UploadScheduler::new(
                api,
                source,
                self.options.concurrency,
                self.options.retry,
            )
            .run(&session, tracker.observer)
            .await?
        };
        tracker.enter(UploadState::AllChunksAcked);

        let chunks = acked.chunk_count();
        let retries = acked.retries();

        tracker.enter(UploadState::Finalizing);
        let source_file = Finalizer::new(api).finalize(acked, digest).await?;
        tracker.enter(UploadState::Finalized);
        tracker.emit(UploadEvent::Finalized {
            source_file: source_file.clone(),
        });

        let job = JobLauncher::new(api).launch(source_file.id).await?;
        tracker.emit(UploadEvent::Completed { job: job.clone() });

        Ok(UploadReport {
            session,
            source_file,
            job,
            chunks,
            retries,
        })
    }
}

//! Concurrent chunk upload scheduler.
//!
//! A fixed pool of workers shares one atomic cursor. Each worker claims the
//! next unclaimed index with a single `fetch_add`, uploads it (retrying
//! transient failures itself), and goes back for more until the cursor runs
//! past the last chunk. The first permanent failure raises an abort flag:
//! no new chunks are claimed, in-flight uploads are allowed to finish, and
//! their results are discarded.

use crate::api::IngestApi;
use crate::error::UploadError;
use crate::events::{UploadEvent, UploadObserver};
use crate::finalizer::AllChunksAcked;
use crate::retry::RetryPolicy;
use crate::session::SessionClient;
use crate::source::ByteSource;
use phx_core::{Chunk, ChunkPlan, UploadSession};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Result of one successfully acknowledged chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkUploadOutcome {
    /// Chunk index.
    pub index: u64,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
    /// Bytes the server acknowledged.
    pub received: u64,
}

/// Mutable state shared by the workers of a single run.
struct RunState {
    cursor: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicBool,
    failure: Mutex<Option<UploadError>>,
    outcomes: Mutex<Vec<ChunkUploadOutcome>>,
}

impl RunState {
    fn new(total: u64) -> Self {
        Self {
            cursor: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
            outcomes: Mutex::new(Vec::with_capacity(usize::try_from(total).unwrap_or(0))),
        }
    }

    /// Claim the next chunk index. Never hands out the same index twice.
    fn claim(&self) -> u64 {
        self.cursor.fetch_add(1, Ordering::AcqRel)
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Record a fatal error. The first one wins; later ones are only logged.
    fn fail(&self, err: UploadError) {
        self.aborted.store(true, Ordering::Release);
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        if failure.is_none() {
            *failure = Some(err);
        } else {
            tracing::debug!(error = %err, "additional chunk failure after abort");
        }
    }

    fn record(&self, outcome: ChunkUploadOutcome) -> u64 {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(outcome);
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn into_result(self) -> Result<Vec<ChunkUploadOutcome>, UploadError> {
        let failure = self.failure.into_inner().unwrap_or_else(|e| e.into_inner());
        match failure {
            Some(err) => Err(err),
            None => Ok(self.outcomes.into_inner().unwrap_or_else(|e| e.into_inner())),
        }
    }
}

/// Uploads every chunk of a session with bounded concurrency.
pub struct UploadScheduler<'a> {
    sessions: SessionClient<'a>,
    source: &'a dyn ByteSource,
    concurrency: usize,
    retry: RetryPolicy,
}

impl<'a> UploadScheduler<'a> {
    /// Create a scheduler. A concurrency of zero is treated as one.
    pub fn new(
        api: &'a dyn IngestApi,
        source: &'a dyn ByteSource,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sessions: SessionClient::new(api),
            source,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Upload all chunks of `session`.
    ///
    /// Returns the completion proof required by the finalizer only if every
    /// expected index was acknowledged exactly once.
    pub async fn run(
        &self,
        session: &UploadSession,
        observer: &dyn UploadObserver,
    ) -> Result<AllChunksAcked, UploadError> {
        let plan = session.plan()?;
        if self.source.len() != plan.total_size() {
            return Err(UploadError::SourceChanged {
                expected: plan.total_size(),
                actual: self.source.len(),
            });
        }

        let total = plan.chunk_count();
        if total == 0 {
            tracing::debug!(upload_id = %session.id, "empty upload, no chunks to send");
            return AllChunksAcked::verify(session.id, 0, Vec::new());
        }

        let workers = usize::try_from(total).map_or(self.concurrency, |t| t.min(self.concurrency));
        tracing::info!(
            upload_id = %session.id,
            chunks = total,
            workers,
            "Uploading chunks"
        );

        let state = RunState::new(total);
        let tasks = (0..workers).map(|worker| self.worker(worker, session, &plan, &state, observer));
        futures::future::join_all(tasks).await;

        let outcomes = state.into_result()?;
        AllChunksAcked::verify(session.id, total, outcomes)
    }

    async fn worker(
        &self,
        worker: usize,
        session: &UploadSession,
        plan: &ChunkPlan,
        state: &RunState,
        observer: &dyn UploadObserver,
    ) {
        let total = plan.chunk_count();
        loop {
            if state.is_aborted() {
                break;
            }
            let Some(chunk) = plan.chunk(state.claim()) else {
                break;
            };

            match self.upload_chunk(session, &chunk, state, observer).await {
                Ok(outcome) => {
                    if state.is_aborted() {
                        tracing::debug!(worker, index = chunk.index, "discarding chunk result after abort");
                        break;
                    }
                    let completed = state.record(outcome);
                    observer.on_event(&UploadEvent::Progress { completed, total });
                }
                Err(err) => {
                    state.fail(err);
                    break;
                }
            }
        }
        tracing::trace!(worker, "upload worker finished");
    }

    /// Read and upload one chunk, retrying transient failures in place.
    async fn upload_chunk(
        &self,
        session: &UploadSession,
        chunk: &Chunk,
        state: &RunState,
        observer: &dyn UploadObserver,
    ) -> Result<ChunkUploadOutcome, UploadError> {
        let data = self
            .source
            .read_range(chunk.range())
            .await
            .map_err(|source| UploadError::ChunkRead {
                index: chunk.index,
                source,
            })?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.sessions.upload_chunk(session, chunk, data.clone()).await {
                Ok(ack) => {
                    return Ok(ChunkUploadOutcome {
                        index: chunk.index,
                        attempts,
                        received: ack.received,
                    });
                }
                Err(err)
                    if err.is_transient()
                        && self.retry.should_retry(attempts)
                        && !state.is_aborted() =>
                {
                    let delay = self.retry.delay(attempts);
                    tracing::warn!(
                        upload_id = %session.id,
                        index = chunk.index,
                        attempt = attempts,
                        error = %err,
                        "Chunk upload failed, retrying in {}ms",
                        delay.as_millis()
                    );
                    observer.on_event(&UploadEvent::ChunkRetry {
                        index: chunk.index,
                        attempt: attempts,
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    if state.is_aborted() {
                        // A sibling failed while we were backing off.
                        return Err(UploadError::ChunkUpload {
                            index: chunk.index,
                            attempts,
                            source: err,
                        });
                    }
                }
                Err(err) => {
                    tracing::error!(
                        upload_id = %session.id,
                        index = chunk.index,
                        attempts,
                        transient = err.is_transient(),
                        error = %err,
                        "Chunk upload failed"
                    );
                    return Err(UploadError::ChunkUpload {
                        index: chunk.index,
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }
}

//! Shared test helpers: an instrumented in-memory ingest API and observers.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use phx_client::error::{ApiError, ApiResult};
use phx_client::events::{UploadEvent, UploadObserver, UploadState};
use phx_client::{IngestApi, RetryPolicy, UploadOptions};
use phx_core::job::IngestJobId;
use phx_core::upload::{CreateUploadRequest, CreateUploadResponse};
use phx_core::{
    ChunkAck, ContentHash, IngestJob, JobStatus, SourceFile, SourceFileId, UploadId,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How an upload of a given chunk index should misbehave.
#[derive(Clone, Debug)]
pub enum ChunkFailure {
    /// Fail with 503 this many times, then succeed.
    Transient(usize),
    /// Always fail with the given status.
    Permanent(u16),
}

struct MockSession {
    request: CreateUploadRequest,
    chunks: BTreeMap<u64, Bytes>,
    finalized: bool,
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<UploadId, MockSession>,
    source_files: HashMap<SourceFileId, SourceFile>,
    jobs: Vec<IngestJob>,
    chunk_failures: HashMap<u64, ChunkFailure>,
    chunk_delays: HashMap<u64, Duration>,
    upload_attempts: HashMap<u64, usize>,
    upload_successes: HashMap<u64, usize>,
    create_error: Option<ApiError>,
    finalize_error: Option<ApiError>,
    launch_error: Option<ApiError>,
    digest_override: Option<ContentHash>,
    job_script: VecDeque<JobStatus>,
    poll_failures: usize,
    poll_error: Option<ApiError>,
    launch_status: Option<JobStatus>,
}

/// In-memory ingest API that records every call.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    pub create_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub finalize_calls: AtomicUsize,
    pub create_job_calls: AtomicUsize,
    pub get_job_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn fail_chunk(&self, index: u64, failure: ChunkFailure) {
        self.state().chunk_failures.insert(index, failure);
    }

    pub fn delay_chunk(&self, index: u64, delay: Duration) {
        self.state().chunk_delays.insert(index, delay);
    }

    pub fn fail_create(&self, err: ApiError) {
        self.state().create_error = Some(err);
    }

    pub fn fail_finalize(&self, err: ApiError) {
        self.state().finalize_error = Some(err);
    }

    pub fn fail_launch(&self, err: ApiError) {
        self.state().launch_error = Some(err);
    }

    /// Report this digest from finalize instead of the real one.
    pub fn override_digest(&self, digest: ContentHash) {
        self.state().digest_override = Some(digest);
    }

    /// Statuses returned by successive `get_job` calls. The last one sticks.
    pub fn script_job(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        self.state().job_script.extend(statuses);
    }

    /// Make the next `count` job polls fail with 503.
    pub fn fail_polls(&self, count: usize) {
        self.state().poll_failures = count;
    }

    /// Make the next `count` job polls fail with `err`.
    pub fn fail_polls_with(&self, count: usize, err: ApiError) {
        let mut state = self.state();
        state.poll_failures = count;
        state.poll_error = Some(err);
    }

    /// Status reported by newly launched jobs instead of `queued`.
    pub fn launch_with_status(&self, status: JobStatus) {
        self.state().launch_status = Some(status);
    }

    /// Insert a job directly, as if launched earlier.
    pub fn seed_job(&self, status: JobStatus) -> IngestJob {
        let job = job_record(SourceFileId::new(), status);
        self.state().jobs.push(job.clone());
        job
    }

    pub fn upload_attempts(&self, index: u64) -> usize {
        self.state().upload_attempts.get(&index).copied().unwrap_or(0)
    }

    /// Successful uploads per index.
    pub fn upload_successes(&self) -> HashMap<u64, usize> {
        self.state().upload_successes.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn finalizes(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.create_job_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.get_job_calls.load(Ordering::SeqCst)
    }

    /// Chunk lengths received for a session, in index order.
    pub fn chunk_lengths(&self, upload_id: UploadId) -> Vec<usize> {
        self.state()
            .sessions
            .get(&upload_id)
            .map(|s| s.chunks.values().map(Bytes::len).collect())
            .unwrap_or_default()
    }

    /// Source file ids that jobs were launched for.
    pub fn launched_for(&self) -> Vec<SourceFileId> {
        self.state().jobs.iter().map(|j| j.source_file_id).collect()
    }
}

pub fn status_error(status: u16, body: &str) -> ApiError {
    ApiError::Status {
        status,
        body: body.to_string(),
    }
}

pub fn job_record(source_file_id: SourceFileId, status: JobStatus) -> IngestJob {
    IngestJob {
        id: IngestJobId::new(),
        source_file_id,
        status,
        progress: None,
        stats: None,
        error_text: None,
        created_at: "2024-01-01T00:00:00".to_string(),
        updated_at: "2024-01-01T00:00:00".to_string(),
    }
}

#[async_trait]
impl IngestApi for MockApi {
    async fn create_session(
        &self,
        request: &CreateUploadRequest,
    ) -> ApiResult<CreateUploadResponse> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        let id = UploadId::new();
        state.sessions.insert(
            id,
            MockSession {
                request: request.clone(),
                chunks: BTreeMap::new(),
                finalized: false,
            },
        );
        Ok(CreateUploadResponse {
            id,
            filename: request.filename.clone(),
            size: request.size,
            completed: false,
        })
    }

    async fn upload_chunk(
        &self,
        upload_id: UploadId,
        index: u64,
        data: Bytes,
    ) -> ApiResult<ChunkAck> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = {
            let mut state = self.state();
            *state.upload_attempts.entry(index).or_default() += 1;
            state.chunk_delays.get(&index).copied()
        };
        tokio::time::sleep(delay.unwrap_or(Duration::from_millis(1))).await;

        let result = {
            let mut guard = self.state();
            let state = &mut *guard;
            let failure = match state.chunk_failures.get_mut(&index) {
                Some(ChunkFailure::Transient(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(status_error(503, "busy"))
                }
                Some(ChunkFailure::Permanent(status)) => {
                    Some(status_error(*status, "rejected"))
                }
                _ => None,
            };
            match failure {
                Some(err) => Err(err),
                None => match state.sessions.get_mut(&upload_id) {
                    None => Err(status_error(404, "Upload session not found")),
                    Some(session) if session.finalized => {
                        Err(status_error(409, "Upload already finalized"))
                    }
                    Some(session) => {
                        let received = data.len() as u64;
                        session.chunks.insert(index, data);
                        *state.upload_successes.entry(index).or_default() += 1;
                        Ok(ChunkAck {
                            status: "ok".to_string(),
                            index,
                            received,
                        })
                    }
                },
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn finalize(&self, upload_id: UploadId) -> ApiResult<SourceFile> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.state();
        let state = &mut *guard;
        if let Some(err) = state.finalize_error.clone() {
            return Err(err);
        }
        let digest_override = state.digest_override;
        let session = state
            .sessions
            .get_mut(&upload_id)
            .ok_or_else(|| status_error(404, "Upload session not found"))?;
        if session.finalized {
            return Err(status_error(409, "Upload already finalized"));
        }
        let expected = session.request.expected_chunks;
        if (0..expected).any(|index| !session.chunks.contains_key(&index)) {
            return Err(status_error(400, "Missing chunks"));
        }

        let mut assembled = BytesMut::new();
        for data in session.chunks.values() {
            assembled.extend_from_slice(data);
        }
        session.finalized = true;
        let source_file = SourceFile {
            id: SourceFileId::new(),
            sha256: digest_override.unwrap_or_else(|| ContentHash::compute(&assembled)),
            name: session.request.filename.clone(),
            size: assembled.len() as u64,
            uri: format!("file:///data/{upload_id}"),
            created_at: "2024-01-01T00:00:00".to_string(),
        };
        state
            .source_files
            .insert(source_file.id, source_file.clone());
        Ok(source_file)
    }

    async fn create_job(&self, source_file_id: SourceFileId) -> ApiResult<IngestJob> {
        self.create_job_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(err) = state.launch_error.clone() {
            return Err(err);
        }
        if !state.source_files.contains_key(&source_file_id) {
            return Err(status_error(404, "Source file not found"));
        }
        let status = state.launch_status.clone().unwrap_or(JobStatus::Queued);
        let job = job_record(source_file_id, status);
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: IngestJobId) -> ApiResult<IngestJob> {
        self.get_job_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(state
                .poll_error
                .clone()
                .unwrap_or_else(|| status_error(503, "busy")));
        }
        let next = if state.job_script.len() > 1 {
            state.job_script.pop_front()
        } else {
            state.job_script.front().cloned()
        };
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| status_error(404, "Job not found"))?;
        if let Some(status) = next {
            job.status = status;
        }
        Ok(job.clone())
    }

    async fn list_jobs(&self) -> ApiResult<Vec<IngestJob>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().jobs.iter().rev().cloned().collect())
    }
}

/// Observer that keeps every event it sees.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<UploadEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<UploadState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    /// `completed` values of every progress tick, in arrival order.
    pub fn progress(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::Progress { completed, .. } => Some(completed),
                _ => None,
            })
            .collect()
    }
}

impl UploadObserver for RecordingObserver {
    fn on_event(&self, event: &UploadEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Retry policy with millisecond backoff so tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
    }
}

pub fn options(chunk_size: u64, concurrency: usize) -> UploadOptions {
    UploadOptions {
        chunk_size: NonZeroU64::new(chunk_size).unwrap(),
        concurrency,
        retry: fast_retry(4),
        verify_checksum: true,
    }
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

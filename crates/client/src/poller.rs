//! Periodic ingest job polling with an explicit start/stop lifecycle.

use crate::api::IngestApi;
use crate::error::{ApiError, ApiResult};
use phx_core::{IngestJob, IngestJobId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Smallest interval the poller will tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// One result of a poll.
#[derive(Clone, Debug)]
pub enum PollEvent {
    /// Fresh state of the watched job.
    Updated(IngestJob),
    /// Fresh job list, newest first.
    Listed(Vec<IngestJob>),
    /// The poll failed. Polling continues on the next tick.
    Error(ApiError),
}

/// Receives poll results from a running poller.
pub trait PollObserver: Send + Sync + 'static {
    fn on_poll(&self, event: PollEvent);
}

impl<F> PollObserver for F
where
    F: Fn(PollEvent) + Send + Sync + 'static,
{
    fn on_poll(&self, event: PollEvent) {
        self(event)
    }
}

impl PollObserver for mpsc::UnboundedSender<PollEvent> {
    fn on_poll(&self, event: PollEvent) {
        let _ = self.send(event);
    }
}

#[derive(Clone, Copy, Debug)]
enum Target {
    Job(IngestJobId),
    All,
}

impl Target {
    async fn fetch(self, api: &dyn IngestApi) -> ApiResult<PollEvent> {
        match self {
            Self::Job(job_id) => api.get_job(job_id).await.map(PollEvent::Updated),
            Self::All => api.list_jobs().await.map(PollEvent::Listed),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(job_id) => write!(f, "job {job_id}"),
            Self::All => f.write_str("job list"),
        }
    }
}

/// Polls ingest jobs on a fixed interval.
#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn IngestApi>,
    interval: Duration,
}

impl JobPoller {
    pub fn new(api: Arc<dyn IngestApi>, interval: Duration) -> Self {
        Self {
            api,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling one job. The first poll happens immediately.
    ///
    /// Polling continues until the returned handle is stopped or dropped,
    /// including after the job reaches a terminal status.
    pub fn start(&self, job_id: IngestJobId, observer: impl PollObserver) -> PollerHandle {
        self.spawn(Target::Job(job_id), observer)
    }

    /// Start polling the job list.
    pub fn start_all(&self, observer: impl PollObserver) -> PollerHandle {
        self.spawn(Target::All, observer)
    }

    fn spawn(&self, target: Target, observer: impl PollObserver) -> PollerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            target,
            self.interval,
            observer,
            cancel.clone(),
        ));
        tracing::debug!(poll = %target, interval_ms = self.interval.as_millis(), "Poller started");
        PollerHandle {
            cancel,
            task: Some(task),
        }
    }

    /// Consecutive "not found" answers after which [`Self::wait_for_terminal`]
    /// gives up on a job.
    pub const NOT_FOUND_LIMIT: u32 = 3;

    /// Poll a job until it completes or fails.
    ///
    /// Poll errors are logged and retried on the next tick. The only way
    /// out besides a terminal status is [`Self::NOT_FOUND_LIMIT`] 404s in
    /// a row, returned as the last of them.
    pub async fn wait_for_terminal(
        &self,
        job_id: IngestJobId,
        mut on_update: impl FnMut(&IngestJob),
    ) -> ApiResult<IngestJob> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut not_found = 0;
        loop {
            ticker.tick().await;
            match self.api.get_job(job_id).await {
                Ok(job) => {
                    not_found = 0;
                    on_update(&job);
                    if job.is_terminal() {
                        return Ok(job);
                    }
                }
                Err(err) if err.status() == Some(404) => {
                    not_found += 1;
                    if not_found >= Self::NOT_FOUND_LIMIT {
                        tracing::error!(job_id = %job_id, polls = not_found, "Job not found, giving up");
                        return Err(err);
                    }
                    tracing::warn!(job_id = %job_id, polls = not_found, "Job not found, retrying");
                }
                Err(err) => {
                    not_found = 0;
                    tracing::warn!(
                        job_id = %job_id,
                        transient = err.is_transient(),
                        error = %err,
                        "Job poll failed, retrying"
                    );
                }
            }
        }
    }
}

async fn poll_loop(
    api: Arc<dyn IngestApi>,
    target: Target,
    period: Duration,
    observer: impl PollObserver,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = target.fetch(api.as_ref()) => result,
        };

        // Stop may have been requested while the request was completing.
        if cancel.is_cancelled() {
            break;
        }

        let event = match result {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(poll = %target, error = %err, "Poll failed");
                PollEvent::Error(err)
            }
        };
        observer.on_poll(event);
    }

    tracing::debug!(poll = %target, "Poller stopped");
}

/// Handle to a running poller.
///
/// Dropping the handle cancels polling without waiting for the task.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop polling. Once this returns the observer is never called again.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
            && err.is_panic()
        {
            tracing::error!(error = %err, "Poller task panicked");
        }
    }

    /// Check if stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

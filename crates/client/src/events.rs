//! Run state machine and the status events surfaced to observers.

use crate::error::Stage;
use phx_core::{IngestJob, SourceFile, UploadSession};
use std::fmt;
use tokio::sync::mpsc;

/// Lifecycle of one upload run.
///
/// `Idle → SessionCreated → Uploading → AllChunksAcked → Finalizing →
/// Finalized`. `Failed` is terminal and is entered from `Idle`,
/// `SessionCreated`, `Uploading` or `Finalizing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    SessionCreated,
    Uploading,
    AllChunksAcked,
    Finalizing,
    Finalized,
    Failed,
}

impl UploadState {
    /// Check if the run reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// An empty source goes straight from `SessionCreated` to
    /// `AllChunksAcked`.
    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (*self, next),
            (Idle, SessionCreated)
                | (SessionCreated, Uploading)
                | (SessionCreated, AllChunksAcked)
                | (Uploading, AllChunksAcked)
                | (AllChunksAcked, Finalizing)
                | (Finalizing, Finalized)
                | (Idle | SessionCreated | Uploading | Finalizing, Failed)
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::SessionCreated => "session-created",
            Self::Uploading => "uploading",
            Self::AllChunksAcked => "all-chunks-acked",
            Self::Finalizing => "finalizing",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A status event emitted during a run.
///
/// `Progress` is advisory. A run has succeeded only once `Completed` is seen.
#[derive(Clone, Debug)]
pub enum UploadEvent {
    /// A run began for a source of `size` bytes split into `chunks` chunks.
    Started {
        filename: String,
        size: u64,
        chunks: u64,
    },
    /// The run moved to a new state.
    State(UploadState),
    /// The server opened a session.
    SessionCreated { session: UploadSession },
    /// A chunk was acknowledged.
    Progress { completed: u64, total: u64 },
    /// A chunk failed transiently and will be retried.
    ChunkRetry {
        index: u64,
        attempt: u32,
        error: String,
    },
    /// The session was converted into a source file.
    Finalized { source_file: SourceFile },
    /// The ingest job was launched; the run succeeded.
    Completed { job: IngestJob },
    /// The run failed.
    Failed { stage: Stage, reason: String },
}

/// Receives status events from a run.
pub trait UploadObserver: Send + Sync {
    fn on_event(&self, event: &UploadEvent);
}

impl<F> UploadObserver for F
where
    F: Fn(&UploadEvent) + Send + Sync,
{
    fn on_event(&self, event: &UploadEvent) {
        self(event)
    }
}

impl UploadObserver for mpsc::UnboundedSender<UploadEvent> {
    fn on_event(&self, event: &UploadEvent) {
        // A dropped receiver means nobody is watching anymore.
        let _ = self.send(event.clone());
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {
    fn on_event(&self, _event: &UploadEvent) {}
}

//! Ingest job records and lifecycle.

use crate::upload::{SourceFileId, uuid_id};
use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id! {
    /// Identifier of an ingest job.
    IngestJobId
}

/// Ingest job status.
///
/// Statuses the client does not know about are preserved verbatim in
/// [`JobStatus::Other`] so that polling keeps working against newer servers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    /// Job is waiting for a worker.
    Queued,
    /// A worker is processing the source file.
    Running,
    /// Processing finished; statistics are available.
    Completed,
    /// Processing failed; `error_text` explains why.
    Failed,
    /// Unrecognized status string.
    Other(String),
}

impl JobStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(s) => s,
        }
    }

    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" | "pending" => Self::Queued,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics reported by a processed ingest job.
///
/// Each list holds `(key, count)` pairs ordered most-common first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Events observed per event type.
    #[serde(default)]
    pub event_type_counts: Vec<(String, u64)>,
    /// Events produced per parser.
    #[serde(default)]
    pub parser_counts: Vec<(String, u64)>,
    /// Unrecognized record signatures.
    #[serde(default)]
    pub unknown_signatures: Vec<(String, u64)>,
    /// Timestamp quality distribution.
    #[serde(default)]
    pub ts_quality_counts: Vec<(String, u64)>,
}

impl JobStats {
    /// Total number of recognized events.
    pub fn total_events(&self) -> u64 {
        self.event_type_counts.iter().map(|(_, n)| n).sum()
    }

    /// Total number of unrecognized records.
    pub fn total_unknown(&self) -> u64 {
        self.unknown_signatures.iter().map(|(_, n)| n).sum()
    }
}

/// A downstream processing job keyed on a finalized source file.
///
/// The client only ever reads these; every field is owned by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    /// Job identifier.
    pub id: IngestJobId,
    /// The source file being processed.
    pub source_file_id: SourceFileId,
    /// Current status.
    pub status: JobStatus,
    /// Opaque progress payload.
    #[serde(default, rename = "progress_json")]
    pub progress: Option<serde_json::Value>,
    /// Statistics, present once the worker has produced them.
    #[serde(default, rename = "stats_json")]
    pub stats: Option<JobStats>,
    /// Failure reason for failed jobs.
    #[serde(default)]
    pub error_text: Option<String>,
    /// Creation timestamp as reported by the server.
    pub created_at: String,
    /// Last update timestamp as reported by the server.
    pub updated_at: String,
}

impl IngestJob {
    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Request to create an ingest job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateIngestJobRequest {
    /// The finalized source file to process.
    pub source_file_id: SourceFileId,
}

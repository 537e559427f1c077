//! Error types for remote calls and upload runs.

use phx_core::ContentHash;
use std::fmt;
use thiserror::Error;

/// Errors returned by the remote ingest API.
#[derive(Clone, Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, timeouts, 408, 429 and 5xx responses are transient.
    /// Any other status (404 unknown session, 409 already finalized, 422
    /// invalid index) is a permanent rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidResponse(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// A response body that could not be read to the end.
    ///
    /// reqwest reports a connection closed mid-body as a decode error, so
    /// this is classified here rather than through `From`.
    pub fn body_read(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(format!("failed to read response body: {err}"))
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type for remote calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The stage of a run at which it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Reading or hashing the local source.
    Source,
    /// Creating the upload session.
    Session,
    /// Uploading a chunk.
    Chunk(u64),
    /// Finalizing the session.
    Finalize,
    /// Launching the ingest job.
    Launch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Session => f.write_str("session"),
            Self::Chunk(index) => write!(f, "chunk {index}"),
            Self::Finalize => f.write_str("finalize"),
            Self::Launch => f.write_str("launch"),
        }
    }
}

/// Terminal failure of an upload run.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload options: {0}")]
    Config(#[from] phx_core::Error),

    #[error("failed to read bytes {offset}..{end} of source: {source}")]
    SourceRead {
        offset: u64,
        end: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("source length changed: planned {expected} bytes, found {actual}")]
    SourceChanged { expected: u64, actual: u64 },

    #[error("failed to create upload session: {0}")]
    SessionCreate(#[source] ApiError),

    #[error("chunk {index} failed after {attempts} attempt(s): {source}")]
    ChunkUpload {
        index: u64,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("failed to read chunk {index} from source: {source}")]
    ChunkRead {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk {index} was never acknowledged ({acked} of {expected} chunks acknowledged)")]
    ChunkMissing { index: u64, expected: u64, acked: u64 },

    #[error("finalize failed: {0}")]
    Finalize(#[source] ApiError),

    #[error("checksum mismatch: uploaded {expected}, server assembled {actual}")]
    ChecksumMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("failed to launch ingest job: {0}")]
    JobLaunch(#[source] ApiError),
}

impl UploadError {
    /// The stage this failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) | Self::SourceRead { .. } | Self::SourceChanged { .. } => Stage::Source,
            Self::SessionCreate(_) => Stage::Session,
            Self::ChunkUpload { index, .. }
            | Self::ChunkRead { index, .. }
            | Self::ChunkMissing { index, .. } => Stage::Chunk(*index),
            Self::Finalize(_) | Self::ChecksumMismatch { .. } => Stage::Finalize,
            Self::JobLaunch(_) => Stage::Launch,
        }
    }

    /// Whether the last underlying error was transient (retries exhausted)
    /// rather than a permanent rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ChunkUpload { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

//! Upload orchestration for the phx ingest API.
//!
//! A run splits a byte source into fixed-size chunks, opens an upload
//! session, uploads the chunks through a bounded worker pool, finalizes the
//! session into a source file and launches an ingest job for it. The
//! resulting job can then be tracked with a [`JobPoller`].

pub mod api;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod jobs;
pub mod orchestrator;
pub mod poller;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod source;

pub use api::{HttpApi, IngestApi};
pub use error::{ApiError, ApiResult, Stage, UploadError};
pub use events::{NoopObserver, UploadEvent, UploadObserver, UploadState};
pub use finalizer::{AllChunksAcked, Finalizer};
pub use jobs::JobLauncher;
pub use orchestrator::{UploadOptions, UploadOrchestrator, UploadReport};
pub use poller::{JobPoller, PollEvent, PollObserver, PollerHandle};
pub use retry::RetryPolicy;
pub use scheduler::{ChunkUploadOutcome, UploadScheduler};
pub use session::SessionClient;
pub use source::{ByteSource, FileSource, MemorySource};

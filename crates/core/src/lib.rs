//! Core domain types and shared logic for the phx ingest client.
//!
//! This crate defines the data model used by the client and CLI crates:
//! - Chunk planning (splitting a byte range into fixed-size segments)
//! - Upload session and source file records
//! - Ingest job records, statuses and statistics
//! - Client configuration
//! - Content hashing

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod job;
pub mod upload;

pub use chunk::{Chunk, ChunkPlan};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use job::{IngestJob, IngestJobId, JobStats, JobStatus};
pub use upload::{ChunkAck, SourceFile, SourceFileId, UploadId, UploadSession};

/// Default chunk size: 5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of chunks in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

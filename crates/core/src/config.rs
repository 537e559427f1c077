//! Client configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::time::Duration;

/// Configuration for the upload and ingest client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the ingest API (e.g., "http://localhost:8000").
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum chunk uploads in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per chunk before a transient failure becomes fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Interval between job status refreshes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Hash the source before upload and compare with the server's digest.
    #[serde(default = "default_verify_checksum")]
    pub verify_checksum: bool,
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    crate::DEFAULT_CONCURRENCY
}

fn default_max_attempts() -> u32 {
    4 // first try plus three retries
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_verify_checksum() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            verify_checksum: default_verify_checksum(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk_size == 0 {
            return Err(crate::Error::InvalidChunkSize(0));
        }
        if self.concurrency == 0 {
            return Err(crate::Error::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.server_url.trim().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "server_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Chunk size as a non-zero value.
    pub fn chunk_size(&self) -> crate::Result<NonZeroU64> {
        NonZeroU64::new(self.chunk_size).ok_or(crate::Error::InvalidChunkSize(self.chunk_size))
    }

    /// Base retry delay as a Duration.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

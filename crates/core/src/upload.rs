//! Upload session and source file types.

use crate::chunk::ChunkPlan;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Declares a UUID-backed identifier newtype.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Generate a new random ID.
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string.
            pub fn parse(s: &str) -> crate::Result<Self> {
                ::uuid::Uuid::parse_str(s).map(Self).map_err(|e| {
                    crate::Error::InvalidId(format!("invalid {}: {e}", stringify!($name)))
                })
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &::uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                Self::parse(s)
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id! {
    /// Unique identifier for an upload session.
    UploadId
}

uuid_id! {
    /// Identifier of a finalized source file.
    SourceFileId
}

/// A server-side upload session as seen by the client.
///
/// Immutable once created. `expected_chunks` always equals
/// `ceil(size / chunk_size)` because it is derived from the same plan that
/// drives the upload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadSession {
    /// Server-assigned session identifier.
    pub id: UploadId,
    /// Original filename.
    pub filename: String,
    /// Total size in bytes.
    pub size: u64,
    /// Chunk size for this upload.
    pub chunk_size: u64,
    /// Number of chunks the server should expect.
    pub expected_chunks: u64,
}

impl UploadSession {
    /// Build the session record for a server-assigned ID and a chunk plan.
    pub fn new(id: UploadId, filename: impl Into<String>, plan: &ChunkPlan) -> Self {
        Self {
            id,
            filename: filename.into(),
            size: plan.total_size(),
            chunk_size: plan.chunk_size(),
            expected_chunks: plan.chunk_count(),
        }
    }

    /// The chunk plan this session was created for.
    pub fn plan(&self) -> crate::Result<ChunkPlan> {
        let plan = ChunkPlan::try_new(self.size, self.chunk_size)?;
        if plan.chunk_count() != self.expected_chunks {
            return Err(crate::Error::ChunkCountMismatch {
                expected: plan.chunk_count(),
                actual: self.expected_chunks,
            });
        }
        Ok(plan)
    }
}

/// Request to create an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUploadRequest {
    /// Original filename.
    pub filename: String,
    /// Total size in bytes.
    pub size: u64,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Number of chunks that will be sent.
    pub expected_chunks: u64,
}

impl From<&UploadSession> for CreateUploadRequest {
    fn from(session: &UploadSession) -> Self {
        Self {
            filename: session.filename.clone(),
            size: session.size,
            chunk_size: session.chunk_size,
            expected_chunks: session.expected_chunks,
        }
    }
}

/// Response from creating an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUploadResponse {
    /// The upload session ID.
    pub id: UploadId,
    /// Echoed filename.
    pub filename: String,
    /// Echoed size in bytes.
    pub size: u64,
    /// Whether the session was already finalized.
    #[serde(default)]
    pub completed: bool,
}

/// Acknowledgment for a received chunk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkAck {
    /// Server status string ("ok").
    #[serde(default)]
    pub status: String,
    /// Index the server recorded.
    pub index: u64,
    /// Bytes received.
    pub received: u64,
}

/// A fully assembled upload, owned by the server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFile {
    /// Source file identifier.
    pub id: SourceFileId,
    /// SHA-256 of the assembled content.
    pub sha256: ContentHash,
    /// Stored name.
    pub name: String,
    /// Assembled size in bytes.
    pub size: u64,
    /// Server-side location.
    pub uri: String,
    /// Creation timestamp as reported by the server.
    pub created_at: String,
}

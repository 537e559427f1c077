//! Byte sources that chunks are read from.

use async_trait::async_trait;
use bytes::Bytes;
use phx_core::{ChunkPlan, ContentHash};
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A file-like source with random-access reads.
///
/// Reads may be issued concurrently by several workers.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Whether the source has no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly the bytes in `range`.
    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes>;
}

/// An in-memory source.
#[derive(Clone, Debug, Default)]
pub struct MemorySource(Bytes);

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let start = usize::try_from(range.start).map_err(std::io::Error::other)?;
        let end = usize::try_from(range.end).map_err(std::io::Error::other)?;
        if start > end || end > self.0.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside of {} bytes", self.0.len()),
            ));
        }
        Ok(self.0.slice(start..end))
    }
}

/// A file on disk. Each read opens its own handle so workers never contend
/// on a shared cursor.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Open a file, capturing its current length.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name, if it is valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let len = usize::try_from(range.end.saturating_sub(range.start))
            .map_err(std::io::Error::other)?;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data).await?;
        Ok(Bytes::from(data))
    }
}

/// Hash a source sequentially, one planned chunk at a time.
pub async fn hash_source(
    source: &dyn ByteSource,
    plan: &ChunkPlan,
) -> Result<ContentHash, crate::UploadError> {
    let mut hasher = ContentHash::hasher();
    for chunk in plan.iter() {
        let data = source
            .read_range(chunk.range())
            .await
            .map_err(|source| crate::UploadError::SourceRead {
                offset: chunk.offset,
                end: chunk.end(),
                source,
            })?;
        hasher.update(&data);
    }
    Ok(hasher.finalize())
}

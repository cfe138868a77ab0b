//! Generic storage contract
//!
//! `Storage` is the path-based interface the rest of a file-handling system
//! programs against. Implementations report expected negative outcomes as
//! ordinary values (`false`, `None`, an empty listing) and reserve `Err` for
//! failures the caller has to act on, chiefly `StorageError::Unavailable`.
//!
//! Paths are relative to the storage root; `""` names the root itself.

pub mod handle;
pub mod share;
pub mod staging;

use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;
use crate::translate::stream_failure;

pub use handle::FileHandle;
pub use share::ShareStorage;
pub use staging::OpenMode;

/// File type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::File => "file",
            FileType::Directory => "dir",
        }
    }
}

/// Size and modification time of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Names in a directory, consumed front to back
#[derive(Debug, Default)]
pub struct DirListing {
    names: std::vec::IntoIter<String>,
}

impl DirListing {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names: names.into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl Iterator for DirListing {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.names.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Stable identifier of the storage location
    fn id(&self) -> String;

    async fn stat(&self, path: &str) -> Result<Option<StatInfo>>;

    async fn file_type(&self, path: &str) -> Result<Option<FileType>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn is_readable(&self, path: &str) -> Result<bool>;

    async fn is_updatable(&self, path: &str) -> Result<bool>;

    async fn is_deletable(&self, path: &str) -> Result<bool>;

    /// Delete a file, or a directory with everything below it
    async fn unlink(&self, path: &str) -> Result<bool>;

    /// Move `from` to `to`, replacing anything already at `to`
    async fn rename(&self, from: &str, to: &str) -> Result<bool>;

    async fn mkdir(&self, path: &str) -> Result<bool>;

    /// Remove a directory recursively
    async fn rmdir(&self, path: &str) -> Result<bool>;

    async fn list_dir(&self, path: &str) -> Result<DirListing>;

    /// Open a path with a PHP-style mode string (`r`, `w`, `a+`, ...).
    ///
    /// Returns `None` when the path cannot be opened for the reason the
    /// storage reports as a negative result (e.g. reading a missing file).
    async fn open(&self, path: &str, mode: &str) -> Result<Option<FileHandle>>;

    /// Create an empty file if nothing exists at `path`
    async fn touch(&self, path: &str) -> Result<bool>;

    /// Whether `path` changed after `time`
    async fn has_updated(&self, path: &str, time: SystemTime) -> Result<bool>;

    async fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.file_type(path).await? == Some(FileType::Directory))
    }

    async fn is_file(&self, path: &str) -> Result<bool> {
        Ok(self.file_type(path).await? == Some(FileType::File))
    }

    /// A directory that can be written into
    async fn is_creatable(&self, path: &str) -> Result<bool> {
        Ok(self.is_dir(path).await? && self.is_updatable(path).await?)
    }

    async fn mtime(&self, path: &str) -> Result<Option<SystemTime>> {
        Ok(self.stat(path).await?.map(|s| s.mtime))
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.stat(path).await?.map(|s| s.size))
    }

    /// Remove whatever is at `path`
    async fn remove(&self, path: &str) -> Result<bool> {
        match self.file_type(path).await? {
            Some(FileType::Directory) => self.rmdir(path).await,
            Some(FileType::File) => self.unlink(path).await,
            None => Ok(false),
        }
    }

    /// Whole content of a file
    async fn read_all(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut handle) = self.open(path, "r").await? else {
            return Ok(None);
        };
        let mut data = Vec::new();
        handle
            .read_to_end(&mut data)
            .await
            .map_err(|e| stream_failure("read", e))?;
        handle.close().await?;
        Ok(Some(data))
    }

    /// Replace a file's content
    async fn write_all(&self, path: &str, data: &[u8]) -> Result<bool> {
        let Some(mut handle) = self.open(path, "w").await? else {
            return Ok(false);
        };
        handle
            .write_all(data)
            .await
            .map_err(|e| stream_failure("write", e))?;
        handle.close().await?;
        Ok(true)
    }

    /// Availability self-test: the root must be a directory
    async fn test(&self) -> Result<bool> {
        self.is_dir("").await
    }
}

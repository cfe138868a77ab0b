//! Open-mode emulation through local staging
//!
//! A share can only stream a whole object in or out. Modes that need to read
//! and write the same object, append to it, or open it without truncation
//! are emulated: the remote object (or nothing, for a new file) is copied
//! into a local temp file, the caller works on that file, and `close`
//! uploads the result as a full replacement.
//!
//! Two handles staging the same path do not see each other; the last one to
//! close wins.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use tempfile::TempPath;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::cache::MetadataCache;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, StorageError};
use crate::share::{Share, ShareReader};
use crate::translate::{stream_failure, translate, Policy};

/// Mode requested when opening a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`, `rb`
    Read,
    /// `w`, `wb`
    Write,
    /// `a`, `ab`
    Append,
    /// `a+`
    AppendRead,
    /// `r+`
    ReadWrite,
    /// `w+`, `wb+`
    TruncateReadWrite,
    /// `x`
    Exclusive,
    /// `x+`
    ExclusiveRead,
    /// `c`
    Create,
    /// `c+`
    CreateRead,
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(mode: &str) -> Result<Self> {
        Ok(match mode {
            "r" | "rb" => OpenMode::Read,
            "w" | "wb" => OpenMode::Write,
            "a" | "ab" => OpenMode::Append,
            "a+" => OpenMode::AppendRead,
            "r+" => OpenMode::ReadWrite,
            "w+" | "wb+" => OpenMode::TruncateReadWrite,
            "x" => OpenMode::Exclusive,
            "x+" => OpenMode::ExclusiveRead,
            "c" => OpenMode::Create,
            "c+" => OpenMode::CreateRead,
            other => {
                return Err(StorageError::InvalidArgument(format!(
                    "unsupported open mode '{}'",
                    other
                )))
            }
        })
    }
}

impl OpenMode {
    /// Whether the share can serve this mode directly
    pub fn needs_staging(self) -> bool {
        !matches!(self, OpenMode::Read | OpenMode::Write)
    }

    /// Fails if the object already exists
    pub fn is_exclusive(self) -> bool {
        matches!(self, OpenMode::Exclusive | OpenMode::ExclusiveRead)
    }

    fn local_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => {
                options.read(true);
            }
            OpenMode::Write | OpenMode::Exclusive => {
                options.write(true).truncate(true);
            }
            OpenMode::Append => {
                options.append(true);
            }
            OpenMode::AppendRead => {
                options.read(true).append(true);
            }
            OpenMode::ReadWrite | OpenMode::CreateRead => {
                options.read(true).write(true);
            }
            OpenMode::TruncateReadWrite | OpenMode::ExclusiveRead => {
                options.read(true).write(true).truncate(true);
            }
            OpenMode::Create => {
                options.write(true);
            }
        }
        options
    }
}

/// Allocates local temp files for staged objects
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Stage under `dir`, or the system temp directory
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Create an empty temp file ending in `extension`.
    ///
    /// The file is deleted when the returned path is dropped.
    pub fn allocate(&self, extension: &str) -> Result<TempPath> {
        let file = tempfile::Builder::new()
            .prefix("share-stage-")
            .suffix(extension)
            .tempfile_in(&self.dir)?;
        Ok(file.into_temp_path())
    }
}

/// Local working copy of a remote object, uploaded on `close`
pub struct StagedFile {
    file: Option<File>,
    temp: Option<TempPath>,
    remote: String,
    share: Arc<dyn Share>,
    cache: Arc<MetadataCache>,
    diag: Diagnostics,
}

impl StagedFile {
    /// Fill `temp` from `source` (if any) and open it with `mode`
    pub(crate) async fn open(
        mode: OpenMode,
        temp: TempPath,
        source: Option<ShareReader>,
        remote: String,
        share: Arc<dyn Share>,
        cache: Arc<MetadataCache>,
        diag: Diagnostics,
    ) -> Result<Self> {
        if let Some(mut reader) = source {
            let mut local = File::create(&temp).await?;
            tokio::io::copy(&mut reader, &mut local)
                .await
                .map_err(|e| stream_failure("fetch", e))?;
            local.flush().await?;
        }
        let file = mode.local_options().open(&temp).await?;
        debug!("staged {} at {:?} ({:?})", remote, temp, mode);

        Ok(Self {
            file: Some(file),
            temp: Some(temp),
            remote,
            share,
            cache,
            diag,
        })
    }

    /// Remote path this handle will be uploaded to
    pub fn remote_path(&self) -> &str {
        &self.remote
    }

    /// Upload the working copy and release it.
    ///
    /// The temp file is removed whether or not the upload succeeds.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };

        self.cache.invalidate(&self.remote);
        self.upload(&temp).await?;
        self.cache.invalidate(&self.remote);

        temp.close()?;
        Ok(())
    }

    async fn upload(&self, temp: &TempPath) -> Result<()> {
        let mut source = File::open(temp).await?;
        let mut dest = translate(
            "upload",
            self.share.write(&self.remote).await,
            Policy::Strict,
            &self.diag,
        )?
        .ok_or_else(|| StorageError::PermissionDenied(self.remote.clone()))?;

        let written = tokio::io::copy(&mut source, &mut dest)
            .await
            .map_err(|e| stream_failure("upload", e))?;
        dest.shutdown()
            .await
            .map_err(|e| stream_failure("upload", e))?;
        debug!("uploaded {} bytes to {}", written, self.remote);
        Ok(())
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "staged file already closed"))
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.temp.is_some() {
            self.cache.invalidate(&self.remote);
            warn!(
                "staged handle for {} dropped without close; changes discarded",
                self.remote
            );
        }
    }
}

impl AsyncRead for StagedFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().file() {
            Ok(file) => Pin::new(file).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for StagedFile {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().file() {
            Ok(file) => Pin::new(file).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file() {
            Ok(file) => Pin::new(file).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file() {
            Ok(file) => Pin::new(file).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

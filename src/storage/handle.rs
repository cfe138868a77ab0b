//! Open file handles

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::cache::MetadataCache;
use crate::error::Result;
use crate::share::{ShareReader, ShareWriter};
use crate::storage::staging::StagedFile;
use crate::translate::stream_failure;

/// Handle returned by `Storage::open`.
///
/// Call `close` when done; it completes the write (or upload) and reports
/// failures that dropping the handle would hide.
pub enum FileHandle {
    /// Direct read stream from the share
    Reader(ShareReader),
    /// Direct write stream to the share
    Writer(RemoteWriter),
    /// Locally staged working copy
    Staged(StagedFile),
}

impl FileHandle {
    pub async fn close(self) -> Result<()> {
        match self {
            FileHandle::Reader(_) => Ok(()),
            FileHandle::Writer(writer) => writer.close().await,
            FileHandle::Staged(staged) => staged.close().await,
        }
    }

    pub fn is_staged(&self) -> bool {
        matches!(self, FileHandle::Staged(_))
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileHandle::Reader(_) => f.write_str("FileHandle::Reader"),
            FileHandle::Writer(w) => write!(f, "FileHandle::Writer({})", w.remote),
            FileHandle::Staged(s) => write!(f, "FileHandle::Staged({})", s.remote_path()),
        }
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, what.to_string())
}

impl AsyncRead for FileHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FileHandle::Reader(reader) => Pin::new(reader).poll_read(cx, buf),
            FileHandle::Writer(_) => Poll::Ready(Err(unsupported("handle is write-only"))),
            FileHandle::Staged(staged) => Pin::new(staged).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for FileHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            FileHandle::Reader(_) => Poll::Ready(Err(unsupported("handle is read-only"))),
            FileHandle::Writer(writer) => Pin::new(&mut writer.inner).poll_write(cx, buf),
            FileHandle::Staged(staged) => Pin::new(staged).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FileHandle::Reader(_) => Poll::Ready(Ok(())),
            FileHandle::Writer(writer) => Pin::new(&mut writer.inner).poll_flush(cx),
            FileHandle::Staged(staged) => Pin::new(staged).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FileHandle::Reader(_) => Poll::Ready(Ok(())),
            FileHandle::Writer(writer) => Pin::new(&mut writer.inner).poll_shutdown(cx),
            FileHandle::Staged(staged) => Pin::new(staged).poll_shutdown(cx),
        }
    }
}

/// Remote write stream that drops the path's cached metadata when released
pub struct RemoteWriter {
    inner: ShareWriter,
    remote: String,
    cache: Arc<MetadataCache>,
    released: bool,
}

impl RemoteWriter {
    pub(crate) fn new(inner: ShareWriter, remote: String, cache: Arc<MetadataCache>) -> Self {
        Self {
            inner,
            remote,
            cache,
            released: false,
        }
    }

    async fn close(mut self) -> Result<()> {
        let result = self.inner.shutdown().await;
        self.release();
        result.map_err(|e| stream_failure("write", e))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.cache.invalidate(&self.remote);
        }
    }
}

impl Drop for RemoteWriter {
    fn drop(&mut self) {
        self.release();
    }
}

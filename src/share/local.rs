//! Local directory share implementation
//!
//! Exposes `<base_dir>/<share>` as a share. Useful for running the adapter
//! against a mounted or synced copy of a server export, and for tests that
//! want real file I/O underneath the adapter.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{
    base_name, Credentials, Dependencies, FileInfo, Share, ShareError, ShareReader, ShareResult,
    ShareWriter, Transport,
};

/// Share backed by a local directory
pub struct LocalShare {
    name: String,
    root: PathBuf,
}

impl LocalShare {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Map an absolute share path onto the local tree
    fn local_path(&self, path: &str) -> ShareResult<PathBuf> {
        if !path.starts_with('/') {
            return Err(ShareError::InvalidPath(path.to_string()));
        }
        let mut local = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(ShareError::InvalidPath(path.to_string()));
            }
            local.push(segment);
        }
        Ok(local)
    }

    fn info(path: &str, meta: &std::fs::Metadata) -> FileInfo {
        let name = base_name(path).to_string();
        FileInfo {
            is_hidden: name.starts_with('.'),
            name,
            path: path.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_directory: meta.is_dir(),
            is_read_only: meta.permissions().readonly(),
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[async_trait]
impl Share for LocalShare {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &str) -> ShareResult<FileInfo> {
        let local = self.local_path(path)?;
        trace!("local stat: {:?}", local);
        let meta = tokio::fs::metadata(&local).await?;
        Ok(Self::info(path, &meta))
    }

    async fn dir(&self, path: &str) -> ShareResult<Vec<FileInfo>> {
        let local = self.local_path(path)?;
        let mut entries = tokio::fs::read_dir(&local).await?;
        let mut result = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().await?;
            result.push(Self::info(&join(path, &name), &meta));
        }
        Ok(result)
    }

    async fn read(&self, path: &str) -> ShareResult<ShareReader> {
        let file = tokio::fs::File::open(self.local_path(path)?).await?;
        Ok(Box::new(file))
    }

    async fn write(&self, path: &str) -> ShareResult<ShareWriter> {
        let file = tokio::fs::File::create(self.local_path(path)?).await?;
        Ok(Box::new(file))
    }

    async fn rename(&self, from: &str, to: &str) -> ShareResult<bool> {
        let to_local = self.local_path(to)?;
        if tokio::fs::try_exists(&to_local).await? {
            return Err(ShareError::AlreadyExists(to.to_string()));
        }
        tokio::fs::rename(self.local_path(from)?, to_local).await?;
        Ok(true)
    }

    async fn delete(&self, path: &str) -> ShareResult<()> {
        tokio::fs::remove_file(self.local_path(path)?).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> ShareResult<()> {
        tokio::fs::create_dir(self.local_path(path)?).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> ShareResult<()> {
        tokio::fs::remove_dir(self.local_path(path)?).await?;
        Ok(())
    }
}

/// Transport resolving share names to subdirectories of a base directory
pub struct LocalTransport {
    base_dir: PathBuf,
}

impl LocalTransport {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn check_dependencies(&self) -> Dependencies {
        if self.base_dir.is_dir() {
            Dependencies::Available
        } else {
            Dependencies::Missing(vec![self.base_dir.display().to_string()])
        }
    }

    async fn connect(&self, credentials: &Credentials, share: &str) -> ShareResult<Arc<dyn Share>> {
        let root = self.base_dir.join(share);
        debug!(
            "local connect: {}@{} share={} root={:?}",
            credentials.user, credentials.host, share, root
        );
        let meta = tokio::fs::metadata(&root).await?;
        if !meta.is_dir() {
            return Err(ShareError::NotFound(format!("share {}", share)));
        }
        Ok(Arc::new(LocalShare::new(share, root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let share = LocalShare::new("docs", dir.path());

        share.mkdir("/reports").await.unwrap();
        let mut writer = share.write("/reports/q1.txt").await.unwrap();
        writer.write_all(b"revenue").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let info = share.stat("/reports/q1.txt").await.unwrap();
        assert_eq!(info.name, "q1.txt");
        assert_eq!(info.size, 7);
        assert!(!info.is_directory);

        let mut reader = share.read("/reports/q1.txt").await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "revenue");

        let listing = share.dir("/reports").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, "/reports/q1.txt");
    }

    #[tokio::test]
    async fn test_dot_files_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".profile"), b"x").unwrap();
        let share = LocalShare::new("home", dir.path());
        assert!(share.stat("/.profile").await.unwrap().is_hidden);
    }

    #[tokio::test]
    async fn test_missing_path_is_io_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let share = LocalShare::new("home", dir.path());
        match share.stat("/nope").await {
            Err(ShareError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected: {:?}", other.map(|i| i.path)),
        }
    }

    #[test]
    fn test_dependency_probe_reports_missing_base_dir() {
        let transport = LocalTransport::new("/definitely/not/here");
        assert_eq!(
            transport.check_dependencies(),
            Dependencies::Missing(vec!["/definitely/not/here".to_string()])
        );
    }
}

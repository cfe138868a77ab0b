//! Storage adapter over a remote share
//!
//! `ShareStorage` implements the `Storage` contract on top of a stateless
//! share client. Metadata lookups go through a capped cache that is
//! invalidated by every mutation the adapter performs; open modes the share
//! cannot serve directly are emulated through local staging.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

use crate::cache::{CacheConfig, MetadataCache};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, StorageError};
use crate::path::{self, PathResolver};
use crate::share::{Credentials, Dependencies, FileInfo, Share, Transport};
use crate::storage::handle::{FileHandle, RemoteWriter};
use crate::storage::staging::{OpenMode, StagedFile, StagingArea};
use crate::storage::{DirListing, FileType, StatInfo, Storage};
use crate::translate::{construction_error, stream_failure, translate, Policy};

/// Connection and behaviour settings for one share mount
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShareParams {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Share name; surrounding slashes are ignored
    pub share: Option<String>,
    /// Directory within the share to scope the mount to
    pub root: Option<String>,
    /// Emit call-level diagnostic traces
    #[serde(default)]
    pub diagnostics: bool,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Where staged working copies are kept (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,
}

impl ShareParams {
    /// Split into credentials and share name, failing on anything missing
    fn connection(&self) -> Result<(Credentials, String)> {
        fn required<'a>(value: &'a Option<String>, missing: &mut Vec<&'static str>, name: &'static str) -> &'a str {
            match value.as_deref() {
                Some(v) if !v.is_empty() => v,
                _ => {
                    missing.push(name);
                    ""
                }
            }
        }

        let mut missing = Vec::new();
        let host = required(&self.host, &mut missing, "host");
        let user = required(&self.user, &mut missing, "user");
        let password = required(&self.password, &mut missing, "password");
        let share = self
            .share
            .as_deref()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty());
        if share.is_none() {
            missing.push("share");
        }

        match share {
            Some(share) if missing.is_empty() => Ok((
                Credentials {
                    host: host.to_string(),
                    user: user.to_string(),
                    password: password.to_string(),
                },
                share.to_string(),
            )),
            _ => Err(StorageError::Config(format!(
                "Invalid configuration: missing {}",
                missing.join(", ")
            ))),
        }
    }
}

fn readable(info: &FileInfo) -> bool {
    !info.is_hidden
}

/// Read-only directories can still be written into
fn updatable(info: &FileInfo) -> bool {
    !info.is_hidden && (!info.is_read_only || info.is_directory)
}

fn deletable(info: &FileInfo) -> bool {
    !info.is_hidden && !info.is_read_only
}

/// Storage backed by a remote share
pub struct ShareStorage {
    share: Arc<dyn Share>,
    host: String,
    user: String,
    resolver: PathResolver,
    cache: Arc<MetadataCache>,
    staging: StagingArea,
    diag: Diagnostics,
}

impl ShareStorage {
    /// Connect to the share described by `params`
    pub async fn connect(transport: &dyn Transport, params: &ShareParams) -> Result<Self> {
        let diag = Diagnostics::new(params.diagnostics);
        let (credentials, share_name) = params.connection()?;
        diag.enter("connect", &(&credentials, &share_name, &params.root));

        let share = match transport.connect(&credentials, &share_name).await {
            Ok(share) => share,
            Err(e) => return Err(diag.leave("connect", construction_error(e))),
        };

        let storage = Self {
            share,
            host: credentials.host,
            user: credentials.user,
            resolver: PathResolver::new(params.root.as_deref()),
            cache: Arc::new(MetadataCache::new(params.cache.capacity)),
            staging: StagingArea::new(params.staging_dir.clone()),
            diag,
        };
        info!(
            "connected {} share {} via {}",
            storage.id(),
            share_name,
            transport.kind()
        );
        diag.leave("connect", storage.id());
        Ok(storage)
    }

    /// Probe whether a transport can run in this environment
    pub fn check_dependencies(transport: &dyn Transport) -> Dependencies {
        transport.check_dependencies()
    }

    /// The metadata cache shared by all operations on this mount
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Normalized mount root within the share
    pub fn root(&self) -> &str {
        self.resolver.root()
    }

    /// Metadata for `path`, from cache or a fresh stat
    async fn file_info(&self, path: &str, policy: Policy) -> Result<Option<FileInfo>> {
        let Some(full) = self.resolver.resolve(path) else {
            return Ok(None);
        };
        if let Some(info) = self.cache.get(&full) {
            trace!("stat cache hit for {}", full);
            return Ok(Some(info));
        }
        trace!("stat fetching {}", full);
        let info = translate("stat", self.share.stat(&full).await, policy, &self.diag)?;
        if let Some(info) = &info {
            self.cache.put(&full, info.clone());
        }
        Ok(info)
    }

    fn remove_tree<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let Some(full) = self.resolver.resolve(path) else {
                return Ok(false);
            };
            let entries = translate("rmdir", self.share.dir(&full).await, Policy::BestEffort, &self.diag)?;
            for entry in entries.unwrap_or_default() {
                if entry.is_directory {
                    self.remove_tree(&path::join(path, &entry.name)).await?;
                } else {
                    translate(
                        "rmdir",
                        self.share.delete(&entry.path).await,
                        Policy::BestEffort,
                        &self.diag,
                    )?;
                }
            }
            let removed = translate("rmdir", self.share.rmdir(&full).await, Policy::BestEffort, &self.diag)?;
            Ok(removed.is_some())
        }
        .boxed()
    }

    async fn open_direct(&self, full: String, mode: OpenMode) -> Result<Option<FileHandle>> {
        match mode {
            OpenMode::Read => {
                let reader = translate("open", self.share.read(&full).await, Policy::Strict, &self.diag)?;
                Ok(reader.map(FileHandle::Reader))
            }
            _ => {
                let writer = translate("open", self.share.write(&full).await, Policy::Strict, &self.diag)?;
                self.cache.invalidate(&full);
                Ok(writer.map(|w| {
                    FileHandle::Writer(RemoteWriter::new(w, full, Arc::clone(&self.cache)))
                }))
            }
        }
    }

    async fn open_staged(&self, path: &str, full: String, mode: OpenMode) -> Result<FileHandle> {
        // A failed lookup must not fall through to the create branch, which
        // would replace the remote object with an empty copy on close.
        let source = match self.file_info(path, Policy::Strict).await? {
            Some(_) if mode.is_exclusive() => {
                return Err(StorageError::AlreadyExists(path.to_string()))
            }
            Some(info) if info.is_directory => {
                return Err(StorageError::InvalidArgument(format!(
                    "cannot open directory {}",
                    path
                )))
            }
            Some(info) => {
                if !updatable(&info) {
                    return Err(StorageError::PermissionDenied(path.to_string()));
                }
                let reader = translate("open", self.share.read(&full).await, Policy::Strict, &self.diag)?;
                Some(reader.ok_or_else(|| StorageError::PermissionDenied(path.to_string()))?)
            }
            None => {
                if !self.is_creatable(path::parent_of(path)).await? {
                    return Err(StorageError::PermissionDenied(path.to_string()));
                }
                None
            }
        };

        let temp = self.staging.allocate(path::extension_of(path))?;
        let staged = StagedFile::open(
            mode,
            temp,
            source,
            full,
            Arc::clone(&self.share),
            Arc::clone(&self.cache),
            self.diag,
        )
        .await?;
        Ok(FileHandle::Staged(staged))
    }
}

#[async_trait]
impl Storage for ShareStorage {
    fn id(&self) -> String {
        // The doubled separator before the root is part of the persisted format
        format!(
            "smb::{}@{}//{}/{}",
            self.user,
            self.host,
            self.share.name(),
            self.resolver.root()
        )
    }

    async fn stat(&self, path: &str) -> Result<Option<StatInfo>> {
        self.diag.enter("stat", &path);
        let result = self.file_info(path, Policy::Strict).await.map(|info| {
            info.map(|info| StatInfo {
                size: info.size,
                mtime: info.mtime,
            })
        });
        self.diag.leave("stat", result)
    }

    async fn file_type(&self, path: &str) -> Result<Option<FileType>> {
        self.diag.enter("file_type", &path);
        let result = self.file_info(path, Policy::BestEffort).await.map(|info| {
            info.map(|info| {
                if info.is_directory {
                    FileType::Directory
                } else {
                    FileType::File
                }
            })
        });
        self.diag.leave("file_type", result)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.diag.enter("exists", &path);
        let result = self
            .file_info(path, Policy::BestEffort)
            .await
            .map(|info| info.is_some());
        self.diag.leave("exists", result)
    }

    async fn is_readable(&self, path: &str) -> Result<bool> {
        self.diag.enter("is_readable", &path);
        let result = self
            .file_info(path, Policy::BestEffort)
            .await
            .map(|info| info.is_some_and(|i| readable(&i)));
        self.diag.leave("is_readable", result)
    }

    async fn is_updatable(&self, path: &str) -> Result<bool> {
        self.diag.enter("is_updatable", &path);
        let result = self
            .file_info(path, Policy::BestEffort)
            .await
            .map(|info| info.is_some_and(|i| updatable(&i)));
        self.diag.leave("is_updatable", result)
    }

    async fn is_deletable(&self, path: &str) -> Result<bool> {
        self.diag.enter("is_deletable", &path);
        let result = self
            .file_info(path, Policy::BestEffort)
            .await
            .map(|info| info.is_some_and(|i| deletable(&i)));
        self.diag.leave("is_deletable", result)
    }

    async fn unlink(&self, path: &str) -> Result<bool> {
        self.diag.enter("unlink", &path);
        let result: Result<bool> = async {
            if self.is_dir(path).await? {
                return self.rmdir(path).await;
            }
            let Some(full) = self.resolver.resolve(path) else {
                return Ok(false);
            };
            let deleted = translate("unlink", self.share.delete(&full).await, Policy::Strict, &self.diag);
            self.cache.invalidate(&full);
            deleted.map(|d| d.is_some())
        }
        .await;
        self.diag.leave("unlink", result)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        self.diag.enter("rename", &(from, to));
        let result: Result<bool> = async {
            let (Some(source), Some(target)) =
                (self.resolver.resolve(from), self.resolver.resolve(to))
            else {
                return Ok(false);
            };
            if source == target {
                return self.exists(from).await;
            }
            // The target is only cleared once there is something to move onto it
            let Some(moving) = self.file_info(from, Policy::BestEffort).await? else {
                return Ok(false);
            };

            self.remove(to).await?;
            let renamed = translate(
                "rename",
                self.share.rename(&source, &target).await,
                Policy::Strict,
                &self.diag,
            );

            if moving.is_directory {
                // cached descendants are keyed under the old prefix
                self.cache.clear();
            } else {
                self.cache.invalidate(&source);
                self.cache.invalidate(&target);
            }
            renamed.map(|r| r.unwrap_or(false))
        }
        .await;
        self.diag.leave("rename", result)
    }

    async fn mkdir(&self, path: &str) -> Result<bool> {
        self.diag.enter("mkdir", &path);
        let Some(full) = self.resolver.resolve(path) else {
            return self.diag.leave("mkdir", Ok(false));
        };
        let created = translate("mkdir", self.share.mkdir(&full).await, Policy::BestEffort, &self.diag);
        self.cache.invalidate(&full);
        self.diag.leave("mkdir", created.map(|c| c.is_some()))
    }

    async fn rmdir(&self, path: &str) -> Result<bool> {
        self.diag.enter("rmdir", &path);
        self.cache.clear();
        let result = self.remove_tree(path).await;
        self.diag.leave("rmdir", result)
    }

    async fn list_dir(&self, path: &str) -> Result<DirListing> {
        self.diag.enter("list_dir", &path);
        let Some(full) = self.resolver.resolve(path) else {
            return self.diag.leave("list_dir", Ok(DirListing::empty()));
        };
        let entries = match translate("list_dir", self.share.dir(&full).await, Policy::Strict, &self.diag) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => return self.diag.leave("list_dir", Err(e)),
        };

        let names = entries
            .into_iter()
            .map(|entry| {
                let name = entry.name.clone();
                self.cache.put(&PathResolver::child(&full, &name), entry);
                name
            })
            .collect();
        self.diag.leave("list_dir", Ok(DirListing::new(names)))
    }

    async fn open(&self, path: &str, mode: &str) -> Result<Option<FileHandle>> {
        self.diag.enter("open", &(path, mode));
        let result: Result<Option<FileHandle>> = async {
            let mode: OpenMode = mode.parse()?;
            let Some(full) = self.resolver.resolve(path) else {
                return Ok(None);
            };

            if !mode.needs_staging() {
                if mode == OpenMode::Read && self.file_info(path, Policy::Strict).await?.is_none() {
                    return Ok(None);
                }
                self.open_direct(full, mode).await
            } else {
                debug!("emulating mode {:?} for {}", mode, full);
                self.open_staged(path, full, mode).await.map(Some)
            }
        }
        .await;
        self.diag.leave("open", result)
    }

    async fn touch(&self, path: &str) -> Result<bool> {
        self.diag.enter("touch", &path);
        let result: Result<bool> = async {
            if self.exists(path).await? {
                return Ok(false);
            }
            let Some(full) = self.resolver.resolve(path) else {
                return Ok(false);
            };
            let Some(mut writer) =
                translate("touch", self.share.write(&full).await, Policy::Strict, &self.diag)?
            else {
                return Ok(false);
            };
            let closed = writer.shutdown().await.map_err(|e| stream_failure("touch", e));
            self.cache.invalidate(&full);
            closed.map(|_| true)
        }
        .await;
        self.diag.leave("touch", result)
    }

    async fn has_updated(&self, path: &str, time: SystemTime) -> Result<bool> {
        self.diag.enter("has_updated", &(path, time));
        // Shares report no usable mtime for their root; always rescan it
        if self.resolver.is_share_root(path) {
            return self.diag.leave("has_updated", Ok(true));
        }
        let result = self
            .file_info(path, Policy::Strict)
            .await
            .map(|info| info.is_some_and(|i| i.mtime > time));
        self.diag.leave("has_updated", result)
    }

    async fn test(&self) -> Result<bool> {
        self.diag.enter("test", &());
        let healthy = match self.file_info("", Policy::BestEffort).await {
            Ok(info) => info.is_some_and(|i| i.is_directory),
            Err(e) => {
                debug!("health check failed for {}: {}", self.id(), e);
                false
            }
        };
        Ok(self.diag.leave("test", healthy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::memory::{MemoryShare, MemoryTransport};

    fn params() -> ShareParams {
        ShareParams {
            host: Some("fileserver".into()),
            user: Some("alice".into()),
            password: Some("secret".into()),
            share: Some("/projects/".into()),
            ..Default::default()
        }
    }

    async fn storage_with(share: Arc<MemoryShare>, params: &ShareParams) -> ShareStorage {
        let transport = MemoryTransport::new().with_share(share);
        ShareStorage::connect(&transport, params).await.unwrap()
    }

    #[test]
    fn test_missing_parameters_are_reported() {
        let mut incomplete = params();
        incomplete.password = None;
        incomplete.share = Some("/".into());
        let err = incomplete.connection().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("password"), "{}", message);
        assert!(message.contains("share"), "{}", message);
        assert!(!message.contains("host"), "{}", message);
    }

    #[test]
    fn test_permission_predicates() {
        let mut info = FileInfo {
            name: "x".into(),
            path: "/x".into(),
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
            is_directory: false,
            is_hidden: false,
            is_read_only: true,
        };
        assert!(readable(&info));
        assert!(!updatable(&info));
        assert!(!deletable(&info));
        info.is_directory = true;
        assert!(updatable(&info));
        assert!(!deletable(&info));
        info.is_hidden = true;
        assert!(!readable(&info));
        assert!(!updatable(&info));
    }

    #[tokio::test]
    async fn test_identity_is_stable() {
        let share = Arc::new(MemoryShare::new("projects"));
        let mut p = params();
        let storage = storage_with(share.clone(), &p).await;
        assert_eq!(storage.id(), "smb::alice@fileserver//projects//");

        p.root = Some("team/a".into());
        let scoped = storage_with(share, &p).await;
        assert_eq!(scoped.id(), "smb::alice@fileserver//projects//team/a/");
        assert_eq!(scoped.root(), "/team/a/");
    }

    #[tokio::test]
    async fn test_stat_populates_cache_once() {
        let share = Arc::new(MemoryShare::new("projects"));
        share.add_file("/a.txt", "hello");
        let storage = storage_with(share.clone(), &params()).await;

        let stat = storage.stat("a.txt").await.unwrap().unwrap();
        assert_eq!(stat.size, 5);
        assert!(storage.exists("a.txt").await.unwrap());
        assert!(storage.is_file("a.txt").await.unwrap());
        assert_eq!(share.stat_calls(), 1);
    }

    #[tokio::test]
    async fn test_listing_fills_cache_for_children() {
        let share = Arc::new(MemoryShare::new("projects"));
        share.add_file("/docs/a.txt", "1");
        share.add_dir("/docs/sub");
        let storage = storage_with(share.clone(), &params()).await;

        let mut names: Vec<String> = storage.list_dir("docs").await.unwrap().collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);

        assert!(storage.is_dir("docs/sub").await.unwrap());
        assert_eq!(storage.size("docs/a.txt").await.unwrap(), Some(1));
        assert_eq!(share.stat_calls(), 0);
    }

    #[tokio::test]
    async fn test_escaping_paths_are_negative() {
        let share = Arc::new(MemoryShare::new("projects"));
        share.add_file("/outside.txt", "x");
        let mut p = params();
        p.root = Some("/inner".into());
        share.add_dir("/inner");
        let storage = storage_with(share, &p).await;

        assert!(!storage.exists("../outside.txt").await.unwrap());
        assert!(!storage.mkdir("../new").await.unwrap());
        assert!(storage.open("../outside.txt", "r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_construction_failures() {
        let share = Arc::new(MemoryShare::new("projects"));
        let transport = MemoryTransport::new().with_share(share);

        let mut wrong_share = params();
        wrong_share.share = Some("archive".into());
        assert!(matches!(
            ShareStorage::connect(&transport, &wrong_share).await,
            Err(StorageError::Config(_))
        ));

        transport.set_offline(true);
        let err = ShareStorage::connect(&transport, &params()).await.err().unwrap();
        assert!(err.is_unavailable());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_every_traced_call_is_closed() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let share = Arc::new(MemoryShare::new("projects"));
        share.add_file("/inner/a.txt", "a");
        let mut p = params();
        p.root = Some("/inner".into());
        p.diagnostics = true;
        let storage = storage_with(share, &p).await;

        let _ = storage.mkdir("../x").await;
        let _ = storage.list_dir("../x").await;
        let _ = storage.open("../x", "r").await;
        let _ = storage.open("a.txt", "zz").await;
        let _ = storage.rename("a.txt", "a.txt").await;
        let _ = storage.rename("../x", "b.txt").await;
        let _ = storage.rename("missing.txt", "b.txt").await;
        let _ = storage.touch("a.txt").await;
        let _ = storage.touch("../x").await;
        let _ = storage.unlink("../x").await;

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        let entered = output.matches("enter: ").count();
        assert!(entered >= 10, "{}", output);
        assert_eq!(entered, output.matches("leave: ").count(), "{}", output);
    }

    #[tokio::test]
    async fn test_health_check_swallows_errors() {
        let share = Arc::new(MemoryShare::new("projects"));
        let storage = storage_with(share.clone(), &params()).await;
        assert!(storage.test().await.unwrap());

        share.set_offline(true);
        storage.cache().clear();
        assert!(!storage.test().await.unwrap());
    }
}

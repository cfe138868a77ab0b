//! Remote share protocol contract
//!
//! A `Transport` opens a `Share` for a set of credentials. Shares are
//! stateless and path-based: every call receives an absolute path within
//! the share and performs one protocol round trip. The only content
//! operations are whole-object streamed reads and whole-object streamed
//! writes; there is no random access.

pub mod local;
pub mod memory;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Errors raised by a share client
#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type ShareResult<T> = std::result::Result<T, ShareError>;

/// Remote metadata snapshot for a file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    /// Absolute path within the share
    pub path: String,
    pub size: u64,
    pub mtime: SystemTime,
    pub is_directory: bool,
    pub is_hidden: bool,
    pub is_read_only: bool,
}

/// Streamed whole-object read
pub type ShareReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streamed whole-object write. Content is committed on `shutdown`.
pub type ShareWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A named remote directory tree
#[async_trait]
pub trait Share: Send + Sync {
    /// Share name as known to the server
    fn name(&self) -> &str;

    async fn stat(&self, path: &str) -> ShareResult<FileInfo>;

    /// List the direct children of a directory
    async fn dir(&self, path: &str) -> ShareResult<Vec<FileInfo>>;

    async fn read(&self, path: &str) -> ShareResult<ShareReader>;

    /// Open a write stream, creating or truncating the object
    async fn write(&self, path: &str) -> ShareResult<ShareWriter>;

    async fn rename(&self, from: &str, to: &str) -> ShareResult<bool>;

    async fn delete(&self, path: &str) -> ShareResult<()>;

    async fn mkdir(&self, path: &str) -> ShareResult<()>;

    /// Remove an empty directory
    async fn rmdir(&self, path: &str) -> ShareResult<()>;
}

/// Connection parameters for a share server
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***removed***")
            .finish()
    }
}

/// Result of a transport dependency probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependencies {
    Available,
    Missing(Vec<String>),
}

impl Dependencies {
    pub fn is_available(&self) -> bool {
        matches!(self, Dependencies::Available)
    }
}

/// Client side of the share protocol
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Report whether everything the transport needs is present at runtime
    fn check_dependencies(&self) -> Dependencies;

    /// Connect to the server and open the named share
    async fn connect(&self, credentials: &Credentials, share: &str) -> ShareResult<Arc<dyn Share>>;
}

/// Last path segment of an absolute share path
pub(crate) fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

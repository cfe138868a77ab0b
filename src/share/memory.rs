//! In-memory share implementation
//!
//! Keeps a whole share tree in memory. Besides serving as a lightweight
//! backend it can simulate the failure modes of a real server: going
//! offline, denying access to a subtree, and flagging objects hidden or
//! read-only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tracing::trace;

use super::{
    base_name, Credentials, Dependencies, FileInfo, Share, ShareError, ShareReader, ShareResult,
    ShareWriter, Transport,
};

#[derive(Debug, Clone)]
enum NodeKind {
    File(Bytes),
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mtime: SystemTime,
    hidden: bool,
    read_only: bool,
}

impl Node {
    fn file(content: Bytes) -> Self {
        Self {
            kind: NodeKind::File(content),
            mtime: SystemTime::now(),
            hidden: false,
            read_only: false,
        }
    }

    fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            mtime: SystemTime::now(),
            hidden: false,
            read_only: false,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    offline: bool,
    forbidden: HashSet<String>,
}

impl State {
    /// Fail the call if the server is offline or the path is denied
    fn check(&self, path: &str) -> ShareResult<()> {
        if self.offline {
            return Err(ShareError::Connect(format!("server unreachable ({})", path)));
        }
        let mut current = path;
        loop {
            if self.forbidden.contains(current) {
                return Err(ShareError::Forbidden(path.to_string()));
            }
            if current == "/" {
                return Ok(());
            }
            current = parent_key(current);
        }
    }

    fn info(&self, path: &str, node: &Node) -> FileInfo {
        let size = match &node.kind {
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Directory => 0,
        };
        FileInfo {
            name: base_name(path).to_string(),
            path: path.to_string(),
            size,
            mtime: node.mtime,
            is_directory: node.is_dir(),
            is_hidden: node.hidden,
            is_read_only: node.read_only,
        }
    }

    fn require_parent_dir(&self, path: &str) -> ShareResult<()> {
        match self.nodes.get(parent_key(path)) {
            Some(parent) if parent.is_dir() => Ok(()),
            Some(_) => Err(ShareError::InvalidPath(format!("parent is a file: {}", path))),
            None => Err(ShareError::NotFound(parent_key(path).to_string())),
        }
    }

    fn touch_parent(&mut self, path: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_key(path)) {
            parent.mtime = SystemTime::now();
        }
    }

    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a String, &'a Node)> + 'a {
        self.nodes
            .iter()
            .filter(move |(key, _)| key.as_str() != "/" && parent_key(key) == dir)
    }
}

/// Normalize a share path into a map key
fn key(path: &str) -> ShareResult<String> {
    if !path.starts_with('/') {
        return Err(ShareError::InvalidPath(path.to_string()));
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

fn parent_key(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Share whose tree lives in memory
pub struct MemoryShare {
    name: String,
    state: Arc<Mutex<State>>,
    stat_calls: AtomicUsize,
}

impl MemoryShare {
    /// Create an empty share containing only its root directory
    pub fn new(name: impl Into<String>) -> Self {
        let mut state = State::default();
        state.nodes.insert("/".to_string(), Node::directory());
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
            stat_calls: AtomicUsize::new(0),
        }
    }

    /// Seed a file, creating missing parent directories
    pub fn add_file(&self, path: &str, content: impl Into<Bytes>) {
        let mut state = self.state.lock();
        Self::create_parents(&mut state, path);
        state.nodes.insert(path.to_string(), Node::file(content.into()));
    }

    /// Seed a directory, creating missing parent directories
    pub fn add_dir(&self, path: &str) {
        let mut state = self.state.lock();
        Self::create_parents(&mut state, path);
        state
            .nodes
            .entry(path.to_string())
            .or_insert_with(Node::directory);
    }

    fn create_parents(state: &mut State, path: &str) {
        let mut missing = Vec::new();
        let mut current = parent_key(path);
        while !state.nodes.contains_key(current) {
            missing.push(current.to_string());
            current = parent_key(current);
        }
        for dir in missing.into_iter().rev() {
            state.nodes.insert(dir, Node::directory());
        }
    }

    pub fn set_hidden(&self, path: &str, hidden: bool) {
        if let Some(node) = self.state.lock().nodes.get_mut(path) {
            node.hidden = hidden;
        }
    }

    pub fn set_read_only(&self, path: &str, read_only: bool) {
        if let Some(node) = self.state.lock().nodes.get_mut(path) {
            node.read_only = read_only;
        }
    }

    pub fn set_mtime(&self, path: &str, mtime: SystemTime) {
        if let Some(node) = self.state.lock().nodes.get_mut(path) {
            node.mtime = mtime;
        }
    }

    /// Simulate losing (or regaining) the connection to the server
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Deny access to a path and everything below it
    pub fn forbid(&self, path: &str) {
        self.state.lock().forbidden.insert(path.to_string());
    }

    pub fn allow(&self, path: &str) {
        self.state.lock().forbidden.remove(path);
    }

    /// Number of `stat` round trips served so far
    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    /// File content, bypassing access checks
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::File(data)) => Some(data.to_vec()),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// All paths currently in the share, sorted
    pub fn paths(&self) -> Vec<String> {
        self.state.lock().nodes.keys().cloned().collect()
    }
}

#[async_trait]
impl Share for MemoryShare {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &str) -> ShareResult<FileInfo> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        let path = key(path)?;
        trace!("memory stat: {}", path);
        let state = self.state.lock();
        state.check(&path)?;
        state
            .nodes
            .get(&path)
            .map(|node| state.info(&path, node))
            .ok_or(ShareError::NotFound(path))
    }

    async fn dir(&self, path: &str) -> ShareResult<Vec<FileInfo>> {
        let path = key(path)?;
        let state = self.state.lock();
        state.check(&path)?;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => Ok(state
                .children(&path)
                .map(|(child, node)| state.info(child, node))
                .collect()),
            Some(_) => Err(ShareError::InvalidPath(format!("not a directory: {}", path))),
            None => Err(ShareError::NotFound(path)),
        }
    }

    async fn read(&self, path: &str) -> ShareResult<ShareReader> {
        let path = key(path)?;
        let state = self.state.lock();
        state.check(&path)?;
        match state.nodes.get(&path).map(|n| &n.kind) {
            Some(NodeKind::File(data)) => Ok(Box::new(Cursor::new(data.to_vec()))),
            Some(NodeKind::Directory) => {
                Err(ShareError::InvalidPath(format!("is a directory: {}", path)))
            }
            None => Err(ShareError::NotFound(path)),
        }
    }

    async fn write(&self, path: &str) -> ShareResult<ShareWriter> {
        let path = key(path)?;
        let mut state = self.state.lock();
        state.check(&path)?;
        state.require_parent_dir(&path)?;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => {
                return Err(ShareError::InvalidPath(format!("is a directory: {}", path)))
            }
            Some(node) if node.read_only => return Err(ShareError::Forbidden(path)),
            _ => {}
        }
        state.nodes.insert(path.clone(), Node::file(Bytes::new()));
        state.touch_parent(&path);
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            path,
            buffer: Vec::new(),
            committed: false,
        }))
    }

    async fn rename(&self, from: &str, to: &str) -> ShareResult<bool> {
        let from = key(from)?;
        let to = key(to)?;
        let mut state = self.state.lock();
        state.check(&from)?;
        state.check(&to)?;
        if !state.nodes.contains_key(&from) {
            return Err(ShareError::NotFound(from));
        }
        if state.nodes.contains_key(&to) {
            return Err(ShareError::AlreadyExists(to));
        }
        state.require_parent_dir(&to)?;

        let prefix = format!("{}/", from);
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = state.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                state.nodes.insert(new, node);
            }
        }
        state.touch_parent(&from);
        state.touch_parent(&to);
        Ok(true)
    }

    async fn delete(&self, path: &str) -> ShareResult<()> {
        let path = key(path)?;
        let mut state = self.state.lock();
        state.check(&path)?;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => {
                return Err(ShareError::InvalidPath(format!("is a directory: {}", path)))
            }
            Some(node) if node.read_only => return Err(ShareError::Forbidden(path)),
            Some(_) => {}
            None => return Err(ShareError::NotFound(path)),
        }
        state.nodes.remove(&path);
        state.touch_parent(&path);
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> ShareResult<()> {
        let path = key(path)?;
        let mut state = self.state.lock();
        state.check(&path)?;
        if state.nodes.contains_key(&path) {
            return Err(ShareError::AlreadyExists(path));
        }
        state.require_parent_dir(&path)?;
        state.nodes.insert(path.clone(), Node::directory());
        state.touch_parent(&path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> ShareResult<()> {
        let path = key(path)?;
        let mut state = self.state.lock();
        state.check(&path)?;
        if path == "/" {
            return Err(ShareError::Forbidden(path));
        }
        match state.nodes.get(&path) {
            Some(node) if !node.is_dir() => {
                return Err(ShareError::InvalidPath(format!("not a directory: {}", path)))
            }
            Some(_) => {}
            None => return Err(ShareError::NotFound(path)),
        }
        if state.children(&path).next().is_some() {
            return Err(ShareError::NotEmpty(path));
        }
        state.nodes.remove(&path);
        state.touch_parent(&path);
        Ok(())
    }
}

/// Write stream that commits its buffer into the tree on shutdown
struct MemoryWriter {
    state: Arc<Mutex<State>>,
    path: String,
    buffer: Vec<u8>,
    committed: bool,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write stream already closed",
            )));
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Ok(()));
        }
        let mut state = this.state.lock();
        if state.offline {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "server unreachable",
            )));
        }
        let content = Bytes::from(std::mem::take(&mut this.buffer));
        match state.nodes.get_mut(&this.path) {
            Some(node) => {
                node.kind = NodeKind::File(content);
                node.mtime = SystemTime::now();
            }
            None => {
                state.nodes.insert(this.path.clone(), Node::file(content));
            }
        }
        this.committed = true;
        Poll::Ready(Ok(()))
    }
}

/// Transport serving a fixed set of in-memory shares
#[derive(Default)]
pub struct MemoryTransport {
    shares: Mutex<HashMap<String, Arc<MemoryShare>>>,
    offline: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_share(self, share: Arc<MemoryShare>) -> Self {
        self.shares.lock().insert(share.name().to_string(), share);
        self
    }

    /// Make every subsequent `connect` fail as unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn check_dependencies(&self) -> Dependencies {
        Dependencies::Available
    }

    async fn connect(&self, credentials: &Credentials, share: &str) -> ShareResult<Arc<dyn Share>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ShareError::Connect(format!(
                "{} is unreachable",
                credentials.host
            )));
        }
        match self.shares.lock().get(share) {
            Some(found) => Ok(Arc::clone(found) as Arc<dyn Share>),
            None => Err(ShareError::NotFound(format!("share {}", share))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_commits_on_shutdown() {
        let share = MemoryShare::new("data");
        let mut writer = share.write("/note.txt").await.unwrap();
        writer.write_all(b"hello").await.unwrap();
        assert_eq!(share.contents("/note.txt"), Some(Vec::new()));

        writer.shutdown().await.unwrap();
        assert_eq!(share.contents("/note.txt"), Some(b"hello".to_vec()));

        let mut reader = share.read("/note.txt").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn test_dir_lists_direct_children_only() {
        let share = MemoryShare::new("data");
        share.add_file("/a/one.txt", "1");
        share.add_file("/a/sub/two.txt", "2");

        let mut names: Vec<String> = share
            .dir("/a")
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_rename_moves_subtree_and_refuses_existing_target() {
        let share = MemoryShare::new("data");
        share.add_file("/src/inner/f.txt", "x");
        share.add_file("/taken", "y");

        assert!(matches!(
            share.rename("/src", "/taken").await,
            Err(ShareError::AlreadyExists(_))
        ));
        assert!(share.rename("/src", "/dst").await.unwrap());
        assert!(share.contains("/dst/inner/f.txt"));
        assert!(!share.contains("/src"));
    }

    #[tokio::test]
    async fn test_rmdir_requires_empty_directory() {
        let share = MemoryShare::new("data");
        share.add_file("/dir/f", "x");
        assert!(matches!(
            share.rmdir("/dir").await,
            Err(ShareError::NotEmpty(_))
        ));
        share.delete("/dir/f").await.unwrap();
        share.rmdir("/dir").await.unwrap();
        assert!(!share.contains("/dir"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let share = MemoryShare::new("data");
        share.add_file("/secret/plans.txt", "x");
        share.forbid("/secret");
        assert!(matches!(
            share.stat("/secret/plans.txt").await,
            Err(ShareError::Forbidden(_))
        ));

        share.set_offline(true);
        assert!(matches!(share.stat("/").await, Err(ShareError::Connect(_))));
        assert_eq!(share.stat_calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_unknown_share() {
        let transport = MemoryTransport::new().with_share(Arc::new(MemoryShare::new("data")));
        let creds = Credentials {
            host: "h".into(),
            user: "u".into(),
            password: "p".into(),
        };
        assert!(transport.connect(&creds, "data").await.is_ok());
        assert!(matches!(
            transport.connect(&creds, "other").await,
            Err(ShareError::NotFound(_))
        ));
    }
}

//! share-storage: a path-based storage adapter for remote file shares
//!
//! Exposes a directory on a remote share (SMB-style: host, share, user,
//! password) through the generic [`Storage`] contract used by a
//! file-handling system.
//!
//! # Architecture
//!
//! - **Share clients**: the [`share::Share`] trait is the stateless remote
//!   protocol surface; a [`share::Transport`] opens one per share.
//! - **Path resolution**: mount-relative paths are mapped into the share,
//!   and anything escaping the mount root is rejected.
//! - **Metadata cache**: a capped LRU of stat results per mount, invalidated
//!   by every mutation the adapter performs.
//! - **Error translation**: share failures become negative results, or
//!   [`StorageError::Unavailable`] when the server cannot be reached.
//! - **Mode emulation**: open modes the share cannot serve directly (`r+`,
//!   `a`, `w+`, `x`, `c`, ...) run against a local staged copy that is
//!   uploaded on close.
//!
//! # Example
//!
//! ```no_run
//! use share_storage::config::Config;
//! use share_storage::share::local::LocalTransport;
//! use share_storage::{ShareStorage, Storage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("config.yaml".as_ref())?;
//! let mount = config.mount("projects").ok_or("no such mount")?;
//!
//! let transport = LocalTransport::new("/srv/shares");
//! let storage = ShareStorage::connect(&transport, &mount.share).await?;
//! for name in storage.list_dir("").await? {
//!     println!("{}", name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod path;
pub mod share;
pub mod storage;
pub mod translate;

pub use error::{Result, StorageError};
pub use storage::{FileHandle, FileType, ShareStorage, StatInfo, Storage};

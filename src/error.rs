use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that cross the storage adapter boundary.
///
/// Expected negative outcomes (missing object, permission denial) are not
/// represented here; the adapter returns them as `Ok(false)`, `Ok(None)` or
/// an empty listing.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The share could not be reached. Applies to the whole mount.
    #[error("Storage not available: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// True when the error means the mount itself is offline
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::Config(err.to_string())
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

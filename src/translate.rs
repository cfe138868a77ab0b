//! Share error classification
//!
//! Every share call goes through `translate`, which turns a share client
//! result into the adapter's three-way outcome:
//!
//! - `Ok(Some(value))` on success
//! - `Ok(None)` when the object is missing or access was denied
//! - `Err(StorageError::Unavailable)` when the server could not be reached
//!
//! Other protocol failures either collapse to `Ok(None)` or surface as
//! `StorageError::Backend`, depending on the operation's `Policy`.

use std::io;

use tracing::warn;

use crate::diagnostics::Diagnostics;
use crate::error::{Result, StorageError};
use crate::share::ShareError;

/// Closed set of failure kinds a share error can fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unavailable,
    NotFound,
    Forbidden,
    Generic,
}

/// How generic protocol failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Surface as `StorageError::Backend`
    Strict,
    /// Treat like a negative result
    BestEffort,
}

pub fn classify(err: &ShareError) -> ErrorKind {
    match err {
        ShareError::Connect(_) | ShareError::Timeout(_) => ErrorKind::Unavailable,
        ShareError::NotFound(_) => ErrorKind::NotFound,
        ShareError::Forbidden(_) => ErrorKind::Forbidden,
        ShareError::Io(e) => classify_io(e.kind()),
        ShareError::AlreadyExists(_)
        | ShareError::NotEmpty(_)
        | ShareError::InvalidPath(_)
        | ShareError::Protocol(_) => ErrorKind::Generic,
    }
}

fn classify_io(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut => ErrorKind::Unavailable,
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Forbidden,
        _ => ErrorKind::Generic,
    }
}

/// Translate a share result for operation `op`
pub fn translate<T>(
    op: &str,
    result: std::result::Result<T, ShareError>,
    policy: Policy,
    diag: &Diagnostics,
) -> Result<Option<T>> {
    let err = match result {
        Ok(value) => return Ok(Some(value)),
        Err(err) => err,
    };

    match classify(&err) {
        ErrorKind::Unavailable => Err(unavailable(op, err)),
        ErrorKind::NotFound | ErrorKind::Forbidden => {
            diag.swallow(op, &err);
            Ok(None)
        }
        ErrorKind::Generic => match policy {
            Policy::BestEffort => {
                diag.swallow(op, &err);
                Ok(None)
            }
            Policy::Strict => Err(StorageError::Backend(format!("{}: {}", op, err))),
        },
    }
}

/// Translate a failure while constructing the adapter.
///
/// Connectivity loss stays `Unavailable`; anything else means the mount is
/// misconfigured.
pub fn construction_error(err: ShareError) -> StorageError {
    match classify(&err) {
        ErrorKind::Unavailable => unavailable("connect", err),
        ErrorKind::NotFound | ErrorKind::Forbidden | ErrorKind::Generic => {
            StorageError::Config(err.to_string())
        }
    }
}

fn unavailable(op: &str, err: ShareError) -> StorageError {
    warn!("share unavailable during {}: {}", op, err);
    StorageError::Unavailable(err.to_string())
}

/// Failure while reading or writing an open share stream
pub fn stream_failure(op: &str, err: io::Error) -> StorageError {
    match classify_io(err.kind()) {
        ErrorKind::Unavailable => unavailable(op, ShareError::Io(err)),
        _ => StorageError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err(kind: io::ErrorKind) -> ShareError {
        ShareError::Io(io::Error::new(kind, "x"))
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&ShareError::Connect("down".into())), ErrorKind::Unavailable);
        assert_eq!(classify(&ShareError::Timeout("slow".into())), ErrorKind::Unavailable);
        assert_eq!(classify(&ShareError::NotFound("/a".into())), ErrorKind::NotFound);
        assert_eq!(classify(&ShareError::Forbidden("/a".into())), ErrorKind::Forbidden);
        assert_eq!(classify(&ShareError::NotEmpty("/a".into())), ErrorKind::Generic);
        assert_eq!(classify(&io_err(io::ErrorKind::TimedOut)), ErrorKind::Unavailable);
        assert_eq!(classify(&io_err(io::ErrorKind::NotFound)), ErrorKind::NotFound);
        assert_eq!(
            classify(&io_err(io::ErrorKind::PermissionDenied)),
            ErrorKind::Forbidden
        );
        assert_eq!(classify(&io_err(io::ErrorKind::InvalidData)), ErrorKind::Generic);
    }

    #[test]
    fn test_translate_outcomes() {
        let diag = Diagnostics::default();

        let ok: Result<Option<u32>> = translate("stat", Ok(7), Policy::Strict, &diag);
        assert_eq!(ok.unwrap(), Some(7));

        let missing: Result<Option<u32>> = translate(
            "stat",
            Err(ShareError::NotFound("/a".into())),
            Policy::Strict,
            &diag,
        );
        assert_eq!(missing.unwrap(), None);

        let denied: Result<Option<u32>> = translate(
            "stat",
            Err(ShareError::Forbidden("/a".into())),
            Policy::Strict,
            &diag,
        );
        assert_eq!(denied.unwrap(), None);

        let down: Result<Option<u32>> = translate(
            "stat",
            Err(ShareError::Connect("gone".into())),
            Policy::BestEffort,
            &diag,
        );
        assert!(down.unwrap_err().is_unavailable());
    }

    #[test]
    fn test_generic_follows_policy() {
        let diag = Diagnostics::new(true);
        let strict: Result<Option<()>> = translate(
            "mkdir",
            Err(ShareError::Protocol("bad reply".into())),
            Policy::Strict,
            &diag,
        );
        assert!(matches!(strict, Err(StorageError::Backend(_))));

        let lenient: Result<Option<()>> = translate(
            "mkdir",
            Err(ShareError::Protocol("bad reply".into())),
            Policy::BestEffort,
            &diag,
        );
        assert!(matches!(lenient, Ok(None)));
    }

    #[test]
    fn test_construction_error() {
        assert!(construction_error(ShareError::Connect("x".into())).is_unavailable());
        assert!(matches!(
            construction_error(ShareError::NotFound("share".into())),
            StorageError::Config(_)
        ));
    }

    #[test]
    fn test_stream_failure() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(stream_failure("read", reset).is_unavailable());
        let corrupt = io::Error::new(io::ErrorKind::InvalidData, "bad");
        assert!(matches!(stream_failure("read", corrupt), StorageError::Io(_)));
    }
}

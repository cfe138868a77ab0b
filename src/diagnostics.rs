//! Per-mount diagnostic tracing
//!
//! Call-level tracing of adapter operations (enter, leave, swallowed
//! errors). Enabled per mount through `ShareParams::diagnostics`; when off,
//! every method returns before any formatting happens.

use std::fmt::Debug;

use tracing::debug;

use crate::share::ShareError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    enabled: bool,
}

impl Diagnostics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn enter(&self, op: &str, args: &dyn Debug) {
        if !self.enabled {
            return;
        }
        debug!(target: "share_storage::diag", "enter: {}({:?})", op, args);
    }

    /// Record the outcome of an operation and hand it back unchanged
    pub fn leave<T: Debug>(&self, op: &str, result: T) -> T {
        if self.enabled {
            debug!(target: "share_storage::diag", "leave: {}, return {:?}", op, result);
        }
        result
    }

    pub fn swallow(&self, op: &str, err: &ShareError) {
        if !self.enabled {
            return;
        }
        debug!(target: "share_storage::diag", "{} swallowing {:?}: {}", op, err, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leave_passes_result_through() {
        let diag = Diagnostics::new(true);
        assert_eq!(diag.leave("exists", Some(3)), Some(3));
        let quiet = Diagnostics::default();
        assert!(!quiet.enabled());
        assert!(quiet.leave("exists", true));
    }
}

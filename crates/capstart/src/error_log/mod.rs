//! Append-only record of the failures met while building a sandbox.
//!
//! Construction keeps going after a failed step, so the log holds the whole
//! causal chain rather than only the first fault. Messages are formatted by
//! the caller; the log only stores them.

use tracing::error;

const LOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::error_log");

/// Ordered, append-only list of human-readable diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorLog {
    entries: Vec<String>,
}

impl ErrorLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends `message` after every existing entry.
    ///
    /// Returns `false` when the log could not grow. Entries stored before the
    /// failed call are left untouched.
    pub fn append(&mut self, message: String) -> bool {
        if self.entries.try_reserve(1).is_err() {
            error!(
                target: LOG_TARGET,
                dropped = %message,
                "error log could not grow; diagnostic dropped"
            );
            return false;
        }
        self.entries.push(message);
        true
    }

    /// Returns every entry, oldest first, together with the entry count.
    #[must_use]
    pub fn all(&self) -> (&[String], usize) {
        (&self.entries, self.entries.len())
    }

    /// Returns the most recent entry, or `None` when nothing has failed yet.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no failure has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emits the full log at debug level. Compiled out of release builds.
    pub fn dump(&self) {
        #[cfg(debug_assertions)]
        {
            tracing::debug!(target: LOG_TARGET, count = self.entries.len(), "{} errors", self.entries.len());
            for entry in &self.entries {
                tracing::debug!(target: LOG_TARGET, " - {entry}");
            }
        }
    }
}

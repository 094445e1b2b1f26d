//! Error types for the interface configuration engine.
//!
//! All errors implement `std::error::Error` via `thiserror`. Per-interface
//! soft failures and the missing-required-variable signal are *not* errors;
//! they are modeled by [`crate::lifecycle::PhaseOutcome`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort an invocation (or one target interface).
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration, reported with file and line.
    #[error("{}:{line}: {message}", file.display())]
    Parse {
        /// File the offending line was read from.
        file: PathBuf,
        /// 1-based line number.
        line: u32,
        /// What was wrong.
        message: String,
    },

    /// A state or lock file could not be opened.
    #[error("failed to open {what} {}: {source}", path.display())]
    Open {
        /// "lockfile", "statefile", ...
        what: &'static str,
        /// The path that failed.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An advisory lock could not be acquired.
    #[error("failed to lock {what} {}: {source}", path.display())]
    Lock {
        /// "lockfile", "statefile", ...
        what: &'static str,
        /// The path that failed.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rewriting the state file did not complete.
    #[error("failed to overwrite statefile {}: {source}", path.display())]
    StateRewrite {
        /// The state file path.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Creates a parse error for `file`:`line`.
    pub fn parse(file: impl Into<PathBuf>, line: u32, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

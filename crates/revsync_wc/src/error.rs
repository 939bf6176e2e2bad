//! Error types for the working-copy crate.

use std::io;
use thiserror::Error;

/// Result type for working-copy operations.
pub type WcResult<T> = Result<T, WcError>;

/// Errors that can occur in working-copy operations.
///
/// Expected, data-dependent outcomes of a merge (obstructed, conflicted,
/// missing, …) are **not** errors; they are returned as
/// [`crate::types::MergeOutcome`] values. Everything here aborts the
/// enclosing walk.
#[derive(Debug, Error)]
pub enum WcError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Delta stream error.
    #[error("delta error: {0}")]
    Delta(#[from] revsync_delta::DeltaError),

    /// Persisted working-copy state is corrupt (entry store, change log).
    #[error("working copy corrupt: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// A pristine base does not match its recorded checksum.
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Working-copy path of the file.
        path: String,
        /// Checksum recorded in the tracking entry.
        expected: String,
        /// Checksum of the bytes on disk.
        actual: String,
    },

    /// A directory's lock sentinel already exists.
    ///
    /// There is no owner fencing; a stale lock must be removed by an
    /// explicit cleanup pass.
    #[error("working copy directory '{path}' is locked")]
    Locked {
        /// Directory that could not be locked.
        path: String,
    },

    /// A file mixes line-ending styles and strict repair was requested.
    #[error("file '{path}' has inconsistent line endings")]
    InconsistentEol {
        /// Offending file.
        path: String,
    },

    /// The path carries no admin area.
    #[error("path '{path}' is not under version control")]
    NotVersioned {
        /// Offending path.
        path: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
}

impl WcError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a not-versioned error.
    pub fn not_versioned(path: impl Into<String>) -> Self {
        Self::NotVersioned { path: path.into() }
    }
}

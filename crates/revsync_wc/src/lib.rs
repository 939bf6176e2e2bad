//! # revsync working-copy engine
//!
//! Tracks a working copy of a directory tree against a repository of
//! immutable revisions.
//!
//! This crate provides:
//! - per-directory tracking-entry stores with hidden-tombstone handling
//! - crash-safe change logs (persist, then execute, then delete)
//! - content translation (line endings, keywords, special files)
//! - three-way text and property merging with conflict markers
//! - the merge/apply engine driven by tree-delta events
//! - the reporter describing local state to a remote peer
//!
//! ## Key invariants
//!
//! - Status outcomes ([`MergeOutcome`]) are return values, never errors
//! - Every mutation funnels through a change log; replay is idempotent
//! - Locks are sentinel files, taken parent-first, released LIFO
//! - A stale lock or leftover log is resolved by an explicit
//!   [`WorkingCopy::cleanup`] pass, never implicitly

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
mod cancel;
pub mod changelog;
mod checksum;
mod config;
pub mod entries;
mod engine;
mod error;
pub mod merge;
pub mod paths;
pub mod props;
mod reporter;
pub mod translate;
mod types;
mod workingcopy;

pub use cancel::Canceller;
pub use checksum::{file_sha256_hex, sha256_hex};
pub use config::WcOptions;
pub use engine::{
    Event, EventAction, EventHandler, FileContent, FileEvent, MergeEngine, MergeOptions,
    RepositoryReader, TextChange,
};
pub use error::{WcError, WcResult};
pub use reporter::{ReportSink, Reporter};
pub use types::{
    is_binary_mime, FileOutcome, MergeLabels, MergeOutcome, NodeKind, Revision, Schedule,
};
pub use workingcopy::WorkingCopy;

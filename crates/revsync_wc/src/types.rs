//! Core type definitions for the working-copy engine.

use std::fmt;

/// A repository revision number.
///
/// Revisions are non-negative; [`Revision::UNKNOWN`] marks an unknown or
/// inherited revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub i64);

impl Revision {
    /// The unknown/inherited revision marker.
    pub const UNKNOWN: Self = Self(-1);

    /// Creates a revision.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// True unless this is the unknown marker.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Kind of a node, on disk or as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeKind {
    /// Nothing exists (or nothing is recorded).
    #[default]
    None,
    /// A regular file (or a symlink tracked as a special file).
    File,
    /// A directory.
    Dir,
}

impl NodeKind {
    /// Stable textual form used by the entry store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::File => "file",
            Self::Dir => "dir",
        }
    }

    /// Parses the textual form.
    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "file" => Some(Self::File),
            "dir" => Some(Self::Dir),
            _ => None,
        }
    }
}

/// Pending local intention for a versioned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// No pending change.
    #[default]
    Normal,
    /// Scheduled for addition.
    Add,
    /// Scheduled for deletion.
    Delete,
    /// Scheduled for replacement: a deletion followed by an addition at
    /// the same path. Only reachable from [`Schedule::Delete`].
    Replace,
}

impl Schedule {
    /// Stable textual form used by the entry store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Replace => "replace",
        }
    }

    /// Parses the textual form.
    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(Self::Normal),
            "add" => Some(Self::Add),
            "delete" => Some(Self::Delete),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Per-path result of a merge/apply step.
///
/// Outcomes are returned to the caller driving the merge, never
/// persisted and never raised as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing needed to change.
    Unchanged,
    /// The incoming change was applied to an unmodified path.
    Changed,
    /// The incoming change was reconciled with local modifications.
    Merged,
    /// Local and incoming edits overlap; conflict markers were written.
    Conflicted,
    /// Local and incoming edits overlap; resolution was deferred to the
    /// caller and nothing was written.
    ConflictedUnresolved,
    /// On-disk state does not match expectations; nothing was mutated.
    Obstructed,
    /// The path (or its parent) is not present to operate on.
    Missing,
    /// No determination was made.
    Unknown,
}

impl MergeOutcome {
    /// True for either conflict outcome.
    #[must_use]
    pub fn is_conflict(self) -> bool {
        matches!(self, Self::Conflicted | Self::ConflictedUnresolved)
    }
}

/// Text and props outcome pair for file events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOutcome {
    /// Outcome for the file's content.
    pub text: MergeOutcome,
    /// Outcome for the file's properties.
    pub props: MergeOutcome,
}

impl FileOutcome {
    /// Both sides undetermined.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            text: MergeOutcome::Unknown,
            props: MergeOutcome::Unknown,
        }
    }

    /// Both sides set to the same outcome.
    #[must_use]
    pub const fn both(outcome: MergeOutcome) -> Self {
        Self {
            text: outcome,
            props: outcome,
        }
    }
}

/// Labels naming the three sides in conflict markers and backup files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLabels {
    /// Label for the local working content.
    pub target: String,
    /// Label for the common base.
    pub left: String,
    /// Label for the incoming content.
    pub right: String,
}

impl MergeLabels {
    /// The conventional labels for merging `left_revision` →
    /// `right_revision` into the working copy.
    #[must_use]
    pub fn for_revisions(left_revision: Revision, right_revision: Revision) -> Self {
        Self {
            target: ".working".to_string(),
            left: format!(".merge-left.{left_revision}"),
            right: format!(".merge-right.{right_revision}"),
        }
    }
}

/// True if a MIME type marks content that must never be text-merged.
///
/// Anything that is not `text/*` counts as binary; an absent MIME type
/// counts as text.
#[must_use]
pub fn is_binary_mime(mime_type: Option<&str>) -> bool {
    match mime_type {
        Some(mime) => !mime.starts_with("text/"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_display_and_validity() {
        assert_eq!(format!("{}", Revision::new(42)), "r42");
        assert!(Revision::new(0).is_valid());
        assert!(!Revision::UNKNOWN.is_valid());
    }

    #[test]
    fn kind_and_schedule_roundtrip() {
        for kind in [NodeKind::None, NodeKind::File, NodeKind::Dir] {
            assert_eq!(NodeKind::from_str(kind.as_str()), Some(kind));
        }
        for schedule in [
            Schedule::Normal,
            Schedule::Add,
            Schedule::Delete,
            Schedule::Replace,
        ] {
            assert_eq!(Schedule::from_str(schedule.as_str()), Some(schedule));
        }
        assert_eq!(Schedule::from_str("bogus"), None);
    }

    #[test]
    fn merge_labels_follow_revisions() {
        let labels = MergeLabels::for_revisions(Revision::new(3), Revision::new(7));
        assert_eq!(labels.target, ".working");
        assert_eq!(labels.left, ".merge-left.r3");
        assert_eq!(labels.right, ".merge-right.r7");
    }

    #[test]
    fn binary_mime_detection() {
        assert!(!is_binary_mime(None));
        assert!(!is_binary_mime(Some("text/plain")));
        assert!(is_binary_mime(Some("application/octet-stream")));
        assert!(is_binary_mime(Some("image/png")));
    }
}

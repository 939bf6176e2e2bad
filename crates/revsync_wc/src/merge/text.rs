//! Three-way text merge over byte buffers.

use crate::merge::diff3::{merge3, split_lines, Chunk};
use crate::types::{MergeLabels, MergeOutcome};

/// Merges `theirs`'s changes against `base` into `mine`.
///
/// Returns the outcome and, when something must be written, the merged
/// bytes:
///
/// - `theirs == base` — nothing to merge; the working text stands
///   (`Unchanged`, no output);
/// - `mine == base` — no local edit; pure replacement by `theirs`
///   (`Merged`);
/// - `mine == theirs` — both sides already agree (`Unchanged`);
/// - clean region merge (`Merged`);
/// - overlapping edits — `Conflicted` with inline markers, or
///   `ConflictedUnresolved` with no output when `leave_conflicts` defers
///   resolution to the caller.
///
/// Identical inputs always produce identical outcome and bytes.
#[must_use]
pub fn merge_text(
    base: &[u8],
    mine: &[u8],
    theirs: &[u8],
    labels: &MergeLabels,
    leave_conflicts: bool,
) -> (MergeOutcome, Option<Vec<u8>>) {
    if theirs == base {
        return (MergeOutcome::Unchanged, None);
    }
    if mine == base {
        return (MergeOutcome::Merged, Some(theirs.to_vec()));
    }
    if mine == theirs {
        return (MergeOutcome::Unchanged, None);
    }

    let base_lines = split_lines(base);
    let mine_lines = split_lines(mine);
    let theirs_lines = split_lines(theirs);
    let chunks = merge3(&base_lines, &mine_lines, &theirs_lines);

    let conflicted = chunks.iter().any(|c| matches!(c, Chunk::Conflict { .. }));
    if conflicted && leave_conflicts {
        return (MergeOutcome::ConflictedUnresolved, None);
    }

    let mut out = Vec::with_capacity(theirs.len().max(mine.len()));
    for chunk in &chunks {
        match chunk {
            Chunk::Stable(range) => extend_lines(&mut out, &base_lines[range.clone()]),
            Chunk::Mine(range) => extend_lines(&mut out, &mine_lines[range.clone()]),
            Chunk::Theirs(range) => extend_lines(&mut out, &theirs_lines[range.clone()]),
            Chunk::Conflict { mine, base, theirs } => {
                push_marker(&mut out, "<<<<<<<", &labels.target);
                extend_lines(&mut out, &mine_lines[mine.clone()]);
                push_marker(&mut out, "|||||||", &labels.left);
                extend_lines(&mut out, &base_lines[base.clone()]);
                out.extend_from_slice(b"=======\n");
                extend_lines(&mut out, &theirs_lines[theirs.clone()]);
                push_marker(&mut out, ">>>>>>>", &labels.right);
            }
        }
    }

    if conflicted {
        (MergeOutcome::Conflicted, Some(out))
    } else if out == mine {
        (MergeOutcome::Unchanged, None)
    } else {
        (MergeOutcome::Merged, Some(out))
    }
}

fn extend_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

fn push_marker(out: &mut Vec<u8>, marker: &str, label: &str) {
    out.extend_from_slice(marker.as_bytes());
    out.push(b' ');
    out.extend_from_slice(label.as_bytes());
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Revision;

    fn labels() -> MergeLabels {
        MergeLabels::for_revisions(Revision::new(1), Revision::new(2))
    }

    #[test]
    fn incoming_change_over_clean_copy_is_a_replacement() {
        let base = b"line1\nline2\n";
        let theirs = b"line1\nline2-edited\n";
        let (outcome, merged) = merge_text(base, base, theirs, &labels(), false);
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(merged.as_deref(), Some(theirs.as_slice()));
    }

    #[test]
    fn no_incoming_change_is_unchanged() {
        let base = b"line1\nline2\n";
        let mine = b"line1\nlocal\n";
        let (outcome, merged) = merge_text(base, mine, base, &labels(), false);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert!(merged.is_none());
    }

    #[test]
    fn identical_edits_are_unchanged() {
        let base = b"a\n";
        let both = b"edited\n";
        let (outcome, merged) = merge_text(base, both, both, &labels(), false);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert!(merged.is_none());
    }

    #[test]
    fn disjoint_edits_merge() {
        let base = b"a\nb\nc\nd\n";
        let mine = b"A\nb\nc\nd\n";
        let theirs = b"a\nb\nc\nD\n";
        let (outcome, merged) = merge_text(base, mine, theirs, &labels(), false);
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(merged.as_deref(), Some(b"A\nb\nc\nD\n".as_slice()));
    }

    #[test]
    fn overlapping_edits_produce_labeled_markers() {
        let base = b"a\nb\nc\n";
        let mine = b"a\nMINE\nc\n";
        let theirs = b"a\nTHEIRS\nc\n";
        let (outcome, merged) = merge_text(base, mine, theirs, &labels(), false);
        assert_eq!(outcome, MergeOutcome::Conflicted);
        let merged = merged.unwrap();
        let text = String::from_utf8(merged).unwrap();
        assert_eq!(
            text,
            "a\n<<<<<<< .working\nMINE\n||||||| .merge-left.r1\nb\n=======\nTHEIRS\n>>>>>>> .merge-right.r2\nc\n"
        );
    }

    #[test]
    fn leave_conflicts_defers_without_output() {
        let base = b"a\n";
        let mine = b"M\n";
        let theirs = b"T\n";
        let (outcome, merged) = merge_text(base, mine, theirs, &labels(), true);
        assert_eq!(outcome, MergeOutcome::ConflictedUnresolved);
        assert!(merged.is_none());
    }

    #[test]
    fn merge_is_deterministic() {
        let base = b"a\nb\nc\n";
        let mine = b"a\nM\nc\n";
        let theirs = b"a\nT\nc\n";
        let first = merge_text(base, mine, theirs, &labels(), false);
        let second = merge_text(base, mine, theirs, &labels(), false);
        assert_eq!(first, second);
    }
}

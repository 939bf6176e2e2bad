//! Line diffing and the three-way region walk.
//!
//! The diff is Myers' shortest-edit-script algorithm over lines; the
//! merge walks both change lists against the common base, combining
//! overlapping regions. Non-overlapping edits merge cleanly; overlapping
//! edits with different replacement text become conflict chunks.

use std::ops::Range;

/// Splits a buffer into lines, keeping terminators attached.
///
/// A final line without a terminator is still a line.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &byte) in data.iter().enumerate() {
        if byte == b'\n' {
            lines.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// One replaced region: lines `a_start..a_end` of the old sequence
/// became lines `b_start..b_end` of the new one. Either side may be
/// empty (pure deletion / pure insertion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// Start of the replaced range in the old sequence.
    pub a_start: usize,
    /// End (exclusive) of the replaced range in the old sequence.
    pub a_end: usize,
    /// Start of the replacement range in the new sequence.
    pub b_start: usize,
    /// End (exclusive) of the replacement range in the new sequence.
    pub b_end: usize,
}

/// Computes the change list between two line sequences (Myers).
pub fn diff_lines(a: &[&[u8]], b: &[&[u8]]) -> Vec<Change> {
    let matches = match_lines(a, b);
    let mut changes = Vec::new();
    let mut prev_a = 0;
    let mut prev_b = 0;
    for &(ma, mb) in matches.iter().chain(std::iter::once(&(a.len(), b.len()))) {
        if ma > prev_a || mb > prev_b {
            changes.push(Change {
                a_start: prev_a,
                a_end: ma,
                b_start: prev_b,
                b_end: mb,
            });
        }
        prev_a = ma + 1;
        prev_b = mb + 1;
        // The sentinel pair is one past the end; the overshoot is
        // harmless because the loop ends here.
    }
    changes
}

/// Runs the forward Myers search and backtracks the matched line pairs.
fn match_lines(a: &[&[u8]], b: &[&[u8]]) -> Vec<(usize, usize)> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    if max == 0 {
        return Vec::new();
    }
    let offset = max;
    let width = (2 * max + 1) as usize;
    let mut v = vec![0isize; width];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut matches = Vec::new();
    let mut x = n;
    let mut y = m;
    for d in (0..trace.len() as isize).rev() {
        if x == 0 && y == 0 {
            break;
        }
        if d == 0 {
            while x > 0 && y > 0 {
                x -= 1;
                y -= 1;
                matches.push((x as usize, y as usize));
            }
            break;
        }
        let v = &trace[d as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[(k - 1 + offset) as usize] < v[(k + 1 + offset) as usize])
        {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[(prev_k + offset) as usize];
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            x -= 1;
            y -= 1;
            matches.push((x as usize, y as usize));
        }
        // The remaining single step is the edit itself.
        x = prev_x;
        y = prev_y;
    }
    matches.reverse();
    matches
}

/// One piece of a three-way merge result. Ranges index into the
/// respective line sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Lines common to all three sides, from the base.
    Stable(Range<usize>),
    /// Lines taken from the local side.
    Mine(Range<usize>),
    /// Lines taken from the incoming side.
    Theirs(Range<usize>),
    /// Overlapping edits that could not be reconciled.
    Conflict {
        /// Replacement lines on the local side.
        mine: Range<usize>,
        /// The disputed base region.
        base: Range<usize>,
        /// Replacement lines on the incoming side.
        theirs: Range<usize>,
    },
}

/// Merges two change lists against their common base.
pub fn merge3(
    base: &[&[u8]],
    mine: &[&[u8]],
    theirs: &[&[u8]],
) -> Vec<Chunk> {
    let changes_mine = diff_lines(base, mine);
    let changes_theirs = diff_lines(base, theirs);

    let mut chunks = Vec::new();
    let mut base_pos = 0;
    let mut i = 0;
    let mut j = 0;

    while i < changes_mine.len() || j < changes_theirs.len() {
        let next_start = changes_mine
            .get(i)
            .map(|c| c.a_start)
            .into_iter()
            .chain(changes_theirs.get(j).map(|c| c.a_start))
            .min()
            .unwrap_or(base.len());
        if next_start > base_pos {
            chunks.push(Chunk::Stable(base_pos..next_start));
        }

        // Grow a combined region from all changes touching it.
        let lo = next_start;
        let mut hi = next_start;
        let mut mine_first: Option<Change> = None;
        let mut mine_last: Option<Change> = None;
        let mut theirs_first: Option<Change> = None;
        let mut theirs_last: Option<Change> = None;
        loop {
            let mut progressed = false;
            if let Some(&c) = changes_mine.get(i) {
                let seeded = mine_first.is_some() || theirs_first.is_some();
                if absorbs(c, lo, hi, seeded) {
                    mine_first.get_or_insert(c);
                    mine_last = Some(c);
                    hi = hi.max(c.a_end);
                    i += 1;
                    progressed = true;
                }
            }
            if let Some(&c) = changes_theirs.get(j) {
                let seeded = mine_first.is_some() || theirs_first.is_some();
                if absorbs(c, lo, hi, seeded) {
                    theirs_first.get_or_insert(c);
                    theirs_last = Some(c);
                    hi = hi.max(c.a_end);
                    j += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        let mine_range = side_range(mine_first, mine_last, lo, hi);
        let theirs_range = side_range(theirs_first, theirs_last, lo, hi);
        match (mine_range, theirs_range) {
            (Some(mine_range), None) => chunks.push(Chunk::Mine(mine_range)),
            (None, Some(theirs_range)) => chunks.push(Chunk::Theirs(theirs_range)),
            (Some(mine_range), Some(theirs_range)) => {
                if mine[mine_range.clone()] == theirs[theirs_range.clone()] {
                    // Both sides made the identical edit.
                    chunks.push(Chunk::Mine(mine_range));
                } else {
                    chunks.push(Chunk::Conflict {
                        mine: mine_range,
                        base: lo..hi,
                        theirs: theirs_range,
                    });
                }
            }
            (None, None) => unreachable!("region without any change"),
        }
        base_pos = hi;
    }
    if base_pos < base.len() {
        chunks.push(Chunk::Stable(base_pos..base.len()));
    }
    chunks
}

/// Whether change `c` belongs to the combined region `[lo, hi)`.
///
/// The region seed is any change starting exactly at `lo`. Afterwards a
/// change joins on proper overlap, or when both it and the region are
/// pure insertions at the same point (their order would be ambiguous).
fn absorbs(c: Change, lo: usize, hi: usize, seeded: bool) -> bool {
    if !seeded {
        return c.a_start == lo;
    }
    c.a_start < hi || (c.a_start == c.a_end && c.a_start == lo && lo == hi)
}

/// Maps the combined base region into one side's line coordinates.
fn side_range(
    first: Option<Change>,
    last: Option<Change>,
    lo: usize,
    hi: usize,
) -> Option<Range<usize>> {
    let (first, last) = (first?, last?);
    let start = (first.b_start as isize - (first.a_start as isize - lo as isize)) as usize;
    let end = last.b_end + (hi - last.a_end);
    Some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<&[u8]> {
        split_lines(text.as_bytes())
    }

    #[test]
    fn split_keeps_terminators() {
        assert_eq!(split_lines(b"a\nb\n"), vec![b"a\n".as_slice(), b"b\n"]);
        assert_eq!(split_lines(b"a\nb"), vec![b"a\n".as_slice(), b"b"]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn diff_of_equal_sequences_is_empty() {
        let a = lines("a\nb\nc\n");
        assert!(diff_lines(&a, &a).is_empty());
    }

    #[test]
    fn diff_finds_single_replacement() {
        let a = lines("a\nb\nc\n");
        let b = lines("a\nB\nc\n");
        assert_eq!(
            diff_lines(&a, &b),
            vec![Change {
                a_start: 1,
                a_end: 2,
                b_start: 1,
                b_end: 2
            }]
        );
    }

    #[test]
    fn diff_finds_insertion_and_deletion() {
        let a = lines("a\nb\nc\n");
        let b = lines("a\nc\nd\n");
        let changes = diff_lines(&a, &b);
        assert_eq!(changes.len(), 2);
        // "b" deleted.
        assert_eq!((changes[0].a_start, changes[0].a_end), (1, 2));
        assert_eq!((changes[0].b_start, changes[0].b_end), (1, 1));
        // "d" inserted at the end.
        assert_eq!((changes[1].a_start, changes[1].a_end), (3, 3));
        assert_eq!((changes[1].b_start, changes[1].b_end), (2, 3));
    }

    #[test]
    fn merge_disjoint_edits() {
        let base = lines("a\nb\nc\nd\n");
        let mine = lines("A\nb\nc\nd\n");
        let theirs = lines("a\nb\nc\nD\n");
        let chunks = merge3(&base, &mine, &theirs);
        assert_eq!(
            chunks,
            vec![
                Chunk::Mine(0..1),
                Chunk::Stable(1..3),
                Chunk::Theirs(3..4),
            ]
        );
    }

    #[test]
    fn merge_identical_edits_take_one_side() {
        let base = lines("a\nb\n");
        let mine = lines("a\nX\n");
        let theirs = lines("a\nX\n");
        let chunks = merge3(&base, &mine, &theirs);
        assert_eq!(chunks, vec![Chunk::Stable(0..1), Chunk::Mine(1..2)]);
    }

    #[test]
    fn merge_overlapping_edits_conflict() {
        let base = lines("a\nb\nc\n");
        let mine = lines("a\nMINE\nc\n");
        let theirs = lines("a\nTHEIRS\nc\n");
        let chunks = merge3(&base, &mine, &theirs);
        assert_eq!(
            chunks,
            vec![
                Chunk::Stable(0..1),
                Chunk::Conflict {
                    mine: 1..2,
                    base: 1..2,
                    theirs: 1..2
                },
                Chunk::Stable(2..3),
            ]
        );
    }

    #[test]
    fn insertions_at_same_point_conflict() {
        let base = lines("a\nb\n");
        let mine = lines("a\nM\nb\n");
        let theirs = lines("a\nT\nb\n");
        let chunks = merge3(&base, &mine, &theirs);
        assert!(chunks
            .iter()
            .any(|c| matches!(c, Chunk::Conflict { .. })));
    }

    #[test]
    fn deletion_merges_against_unrelated_edit() {
        let base = lines("a\nb\nc\nd\ne\n");
        let mine = lines("a\nc\nd\ne\n");
        let theirs = lines("a\nb\nc\nd\nE\n");
        let chunks = merge3(&base, &mine, &theirs);
        assert_eq!(
            chunks,
            vec![
                Chunk::Stable(0..1),
                Chunk::Mine(1..1),
                Chunk::Stable(2..4),
                Chunk::Theirs(4..5),
            ]
        );
    }
}

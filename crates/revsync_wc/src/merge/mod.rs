//! Three-way text and property merging.
//!
//! [`merge_text`] is the pure byte-level merge; [`merge_file`] wraps it
//! for one versioned file, handling detranslation, conflict backup
//! files and the change-log funnel. [`merge_props`] reconciles an
//! incoming property diff.

mod diff3;
mod properties;
mod text;

pub use properties::merge_props;
pub use text::merge_text;

use crate::admin::AdminArea;
use crate::changelog::Command;
use crate::entries::fields;
use crate::error::WcResult;
use crate::types::{MergeLabels, MergeOutcome};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Merges incoming content into the working file `name`.
///
/// `base_path` and `theirs_path` hold the normalized base and incoming
/// texts. The working file is detranslated for comparison; the merged
/// result is installed back through the change log so a crash mid-apply
/// resumes cleanly. With `dry_run` only the outcome is computed.
///
/// On a `Conflicted` outcome the three sides are preserved beside the
/// file under the label suffixes (`foo.working`, `foo.merge-left.rN`,
/// `foo.merge-right.rM`) and the working file gets inline markers.
pub fn merge_file(
    area: &mut AdminArea,
    name: &str,
    base_path: &Path,
    theirs_path: &Path,
    labels: &MergeLabels,
    leave_conflicts: bool,
    dry_run: bool,
) -> WcResult<MergeOutcome> {
    let mine_tmp = area.detranslated_working(name)?;
    let base_bytes = fs::read(base_path)?;
    let mine_bytes = fs::read(&mine_tmp)?;
    let theirs_bytes = fs::read(theirs_path)?;
    let _ = fs::remove_file(&mine_tmp);

    let (outcome, merged) = merge_text(
        &base_bytes,
        &mine_bytes,
        &theirs_bytes,
        labels,
        leave_conflicts,
    );
    debug!(name, ?outcome, "merged text");

    let Some(merged_bytes) = merged else {
        return Ok(outcome);
    };
    if dry_run {
        return Ok(outcome);
    }

    let root = area.root().to_path_buf();
    let rel = |p: &Path| {
        p.strip_prefix(&root)
            .unwrap_or(p)
            .to_string_lossy()
            .into_owned()
    };
    let mut log = area.log()?;

    if outcome == MergeOutcome::Conflicted {
        // Preserve all three sides before the working file is rewritten.
        let backups = [
            (area.file(name), format!("{name}{}", labels.target)),
            (base_path.to_path_buf(), format!("{name}{}", labels.left)),
            (theirs_path.to_path_buf(), format!("{name}{}", labels.right)),
        ];
        for (src, dst) in backups {
            let tmp = area.tmp_file("backup")?;
            fs::copy(&src, &tmp)?;
            log.add_command(Command::Move {
                src: rel(&tmp),
                dst,
            });
        }
    }

    let merged_tmp = area.tmp_file("merged")?;
    fs::write(&merged_tmp, &merged_bytes)?;
    log.add_command(Command::CopyAndTranslate {
        src: rel(&merged_tmp),
        dst: name.to_string(),
        expand: true,
    });
    log.add_command(Command::Delete {
        path: rel(&merged_tmp),
    });
    log.add_command(Command::ModifyEntry {
        name: name.to_string(),
        fields: BTreeMap::from([(
            fields::TEXT_TIME.to_string(),
            fields::WORKING_TIME.to_string(),
        )]),
    });
    log.save()?;
    area.run_logs()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WcOptions;
    use crate::types::{NodeKind, Revision};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn new_area(dir: &Path) -> AdminArea {
        AdminArea::create(
            dir,
            "http://repo/trunk",
            None,
            Some(Uuid::nil()),
            Revision::new(1),
            &WcOptions::default(),
        )
        .unwrap()
    }

    fn seed_file(area: &mut AdminArea, name: &str, working: &[u8], base: &[u8]) {
        fs::write(area.file(name), working).unwrap();
        fs::write(area.text_base_path(name), base).unwrap();
        let entry = area.entries_mut().add_entry(name);
        entry.kind = NodeKind::File;
        entry.revision = Revision::new(1);
    }

    fn labels() -> MergeLabels {
        MergeLabels::for_revisions(Revision::new(1), Revision::new(2))
    }

    #[test]
    fn clean_merge_rewrites_working_file() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("wc");
        let mut area = new_area(&dir);
        seed_file(&mut area, "foo", b"line1\nline2\n", b"line1\nline2\n");

        let base = area.tmp_file("base").unwrap();
        let theirs = area.tmp_file("theirs").unwrap();
        fs::write(&base, b"line1\nline2\n").unwrap();
        fs::write(&theirs, b"line1\nline2-edited\n").unwrap();

        let outcome =
            merge_file(&mut area, "foo", &base, &theirs, &labels(), false, false).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(
            fs::read(dir.join("foo")).unwrap(),
            b"line1\nline2-edited\n"
        );
        // No conflict files anywhere.
        assert!(!dir.join("foo.working").exists());
        assert!(area.entries().entry("foo", true).unwrap().text_time.is_some());
    }

    #[test]
    fn conflict_writes_markers_and_backups() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("wc");
        let mut area = new_area(&dir);
        seed_file(&mut area, "foo", b"a\nMINE\nc\n", b"a\nb\nc\n");

        let base = area.tmp_file("base").unwrap();
        let theirs = area.tmp_file("theirs").unwrap();
        fs::write(&base, b"a\nb\nc\n").unwrap();
        fs::write(&theirs, b"a\nTHEIRS\nc\n").unwrap();

        let outcome =
            merge_file(&mut area, "foo", &base, &theirs, &labels(), false, false).unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted);

        let merged = fs::read_to_string(dir.join("foo")).unwrap();
        assert!(merged.contains("<<<<<<< .working"));
        assert!(merged.contains(">>>>>>> .merge-right.r2"));
        assert_eq!(fs::read(dir.join("foo.working")).unwrap(), b"a\nMINE\nc\n");
        assert_eq!(fs::read(dir.join("foo.merge-left.r1")).unwrap(), b"a\nb\nc\n");
        assert_eq!(
            fs::read(dir.join("foo.merge-right.r2")).unwrap(),
            b"a\nTHEIRS\nc\n"
        );
    }

    #[test]
    fn dry_run_leaves_everything_alone() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("wc");
        let mut area = new_area(&dir);
        seed_file(&mut area, "foo", b"a\nMINE\n", b"a\nb\n");

        let base = area.tmp_file("base").unwrap();
        let theirs = area.tmp_file("theirs").unwrap();
        fs::write(&base, b"a\nb\n").unwrap();
        fs::write(&theirs, b"a\nTHEIRS\n").unwrap();

        let outcome =
            merge_file(&mut area, "foo", &base, &theirs, &labels(), false, true).unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted);
        assert_eq!(fs::read(dir.join("foo")).unwrap(), b"a\nMINE\n");
        assert!(!dir.join("foo.working").exists());
    }

    #[test]
    fn leave_conflicts_keeps_working_file() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("wc");
        let mut area = new_area(&dir);
        seed_file(&mut area, "foo", b"a\nMINE\n", b"a\nb\n");

        let base = area.tmp_file("base").unwrap();
        let theirs = area.tmp_file("theirs").unwrap();
        fs::write(&base, b"a\nb\n").unwrap();
        fs::write(&theirs, b"a\nTHEIRS\n").unwrap();

        let outcome =
            merge_file(&mut area, "foo", &base, &theirs, &labels(), true, false).unwrap();
        assert_eq!(outcome, MergeOutcome::ConflictedUnresolved);
        assert_eq!(fs::read(dir.join("foo")).unwrap(), b"a\nMINE\n");
    }
}

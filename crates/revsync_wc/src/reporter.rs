//! State reporting to a remote peer.
//!
//! The reporter walks the tracking-entry tree and describes what the
//! working copy already has, so the peer can send only the deltas that
//! matter. Entries matching their parent's baseline revision are
//! omitted; divergent URLs become `link_path`; deleted or absent
//! entries become `delete_path`. A file missing from disk (and not
//! scheduled for deletion) is restored from its pristine base first, so
//! the reported revision always corresponds to readable content.

use crate::cancel::Canceller;
use crate::engine::{EventAction, EventHandler};
use crate::entries::Entry;
use crate::error::{WcError, WcResult};
use crate::paths;
use crate::types::{NodeKind, Revision};
use crate::workingcopy::WorkingCopy;
use std::fs;
use std::rc::Rc;
use tracing::debug;

/// Consumer of a working-copy state report.
///
/// A peer receiving an `abort_report` must assume nothing was reported
/// and start over.
pub trait ReportSink {
    /// "I have `path` at `revision`" (with an optional held lock).
    /// `start_empty` marks an incomplete directory whose children the
    /// peer should send in full.
    fn set_path(
        &mut self,
        path: &str,
        lock_token: Option<&str>,
        revision: Revision,
        start_empty: bool,
    ) -> WcResult<()>;

    /// "I no longer have `path`".
    fn delete_path(&mut self, path: &str) -> WcResult<()>;

    /// "`path`'s content comes from a different repository location".
    fn link_path(
        &mut self,
        url: &str,
        path: &str,
        lock_token: Option<&str>,
        revision: Revision,
        start_empty: bool,
    ) -> WcResult<()>;

    /// The report is complete.
    fn finish_report(&mut self) -> WcResult<()>;

    /// The report is void; discard everything.
    fn abort_report(&mut self) -> WcResult<()>;
}

/// Walks the tracking entries and emits a report.
pub struct Reporter<'a> {
    wc: &'a mut WorkingCopy,
    canceller: Canceller,
    restore_files: bool,
    events: Option<Rc<dyn EventHandler>>,
}

impl<'a> Reporter<'a> {
    /// Creates a reporter over `wc`. With `restore_files`, files found
    /// missing on disk are restored from their pristine bases as the
    /// walk discovers them.
    pub fn new(
        wc: &'a mut WorkingCopy,
        canceller: Canceller,
        restore_files: bool,
        events: Option<Rc<dyn EventHandler>>,
    ) -> Self {
        Self {
            wc,
            canceller,
            restore_files,
            events,
        }
    }

    /// Runs the full report against `sink`.
    ///
    /// On success the sink sees `finish_report`; any error aborts the
    /// report first and then propagates.
    pub fn run(&mut self, sink: &mut dyn ReportSink) -> WcResult<()> {
        match self.walk(sink) {
            Ok(()) => sink.finish_report(),
            Err(error) => {
                let _ = sink.abort_report();
                Err(error)
            }
        }
    }

    fn walk(&mut self, sink: &mut dyn ReportSink) -> WcResult<()> {
        let (revision, incomplete) = {
            let area = self
                .wc
                .area("")?
                .ok_or_else(|| WcError::not_versioned("<root>"))?;
            let root = area.entries().this_dir().ok_or_else(|| {
                WcError::corrupt("working copy root has no directory entry")
            })?;
            (root.revision, root.incomplete)
        };
        sink.set_path("", None, revision, incomplete)?;
        self.report_dir(sink, "", revision, incomplete)
    }

    fn report_dir(
        &mut self,
        sink: &mut dyn ReportSink,
        rel: &str,
        base_revision: Revision,
        report_all: bool,
    ) -> WcResult<()> {
        let (entries, parent_url): (Vec<Entry>, Option<String>) = {
            let area = self
                .wc
                .area(rel)?
                .ok_or_else(|| WcError::not_versioned(rel))?;
            (
                area.entries().iter_all().cloned().collect(),
                area.entries().this_dir().and_then(|e| e.url.clone()),
            )
        };

        for entry in entries {
            if entry.name.is_empty() {
                continue;
            }
            self.canceller.check()?;
            let path = paths::join(rel, &entry.name);

            if entry.deleted || entry.absent {
                // Tombstones are reported as gone, unless the whole
                // directory is incomplete and the peer resends anyway.
                if !report_all {
                    sink.delete_path(&path)?;
                }
                continue;
            }
            if entry.is_scheduled_for_addition() {
                // Nothing to report: the repository has never seen it.
                continue;
            }

            match entry.kind {
                NodeKind::File => {
                    self.report_file(sink, rel, &entry, &path, parent_url.as_deref(), base_revision, report_all)?;
                }
                NodeKind::Dir => {
                    self.report_subdir(sink, &entry, &path, report_all)?;
                }
                NodeKind::None => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn report_file(
        &mut self,
        sink: &mut dyn ReportSink,
        dir_rel: &str,
        entry: &Entry,
        path: &str,
        parent_url: Option<&str>,
        base_revision: Revision,
        report_all: bool,
    ) -> WcResult<()> {
        let missing = {
            let area = self.wc.area(dir_rel)?.expect("reported dir is versioned");
            !area.file(&entry.name).exists()
        };
        if missing
            && self.restore_files
            && entry.schedule == crate::types::Schedule::Normal
        {
            self.restore_file(dir_rel, &entry.name)?;
        }

        let expected_url =
            parent_url.map(|url| format!("{url}/{}", entry.name));
        let switched = entry.url.is_some()
            && expected_url.is_some()
            && entry.url != expected_url
            && entry.schedule == crate::types::Schedule::Normal;
        if switched {
            sink.link_path(
                entry.url.as_deref().expect("checked above"),
                path,
                entry.lock_token.as_deref(),
                entry.revision,
                false,
            )?;
        } else if report_all || entry.revision != base_revision || entry.lock_token.is_some() {
            sink.set_path(path, entry.lock_token.as_deref(), entry.revision, false)?;
        }
        Ok(())
    }

    fn report_subdir(
        &mut self,
        sink: &mut dyn ReportSink,
        entry: &Entry,
        path: &str,
        report_all: bool,
    ) -> WcResult<()> {
        if self.wc.area(path)?.is_none() {
            // The child admin area is gone; have the peer resend it.
            if !report_all {
                sink.delete_path(path)?;
            }
            return Ok(());
        }
        let (child_url, child_revision, child_lock, child_incomplete) = {
            let area = self.wc.area(path)?.expect("checked above");
            match area.entries().this_dir() {
                Some(root) => (
                    root.url.clone(),
                    root.revision,
                    root.lock_token.clone(),
                    root.incomplete,
                ),
                None => (None, Revision::UNKNOWN, None, true),
            }
        };

        let switched = child_url.is_some() && entry.url.is_some() && child_url != entry.url;
        if switched {
            sink.link_path(
                child_url.as_deref().expect("checked above"),
                path,
                child_lock.as_deref(),
                child_revision,
                child_incomplete,
            )?;
        } else if report_all
            || child_incomplete
            || child_lock.is_some()
            || child_revision != entry.revision
        {
            sink.set_path(path, child_lock.as_deref(), child_revision, child_incomplete)?;
        }
        self.report_dir(sink, path, child_revision, child_incomplete)
    }

    /// Restores a missing working file from its pristine base and
    /// refreshes the recorded text timestamp, so the report matches
    /// readable content.
    fn restore_file(&mut self, dir_rel: &str, name: &str) -> WcResult<()> {
        {
            let area = self.wc.area(dir_rel)?.expect("reported dir is versioned");
            let base = area.text_base_path(name);
            area.translate_to_working(name, &base)?;
            let mtime = fs::metadata(area.file(name))?.modified()?;
            if let Some(entry) = area.entries_mut().entry_mut(name, true) {
                entry.text_time = Some(mtime);
            }
            area.save_entries(false)?;
        }
        let path = paths::join(dir_rel, name);
        debug!(path, "restored missing file");
        if let Some(handler) = &self.events {
            handler.handle_event(&crate::engine::Event {
                path,
                action: EventAction::Restored,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminArea;
    use crate::config::WcOptions;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Eq, Clone)]
    enum Call {
        Set(String, Revision, bool),
        Delete(String),
        Link(String, String, Revision),
        Finish,
        Abort,
    }

    #[derive(Default)]
    struct RecordingSink(Vec<Call>);

    impl ReportSink for RecordingSink {
        fn set_path(
            &mut self,
            path: &str,
            _lock_token: Option<&str>,
            revision: Revision,
            start_empty: bool,
        ) -> WcResult<()> {
            self.0.push(Call::Set(path.to_string(), revision, start_empty));
            Ok(())
        }
        fn delete_path(&mut self, path: &str) -> WcResult<()> {
            self.0.push(Call::Delete(path.to_string()));
            Ok(())
        }
        fn link_path(
            &mut self,
            url: &str,
            path: &str,
            _lock_token: Option<&str>,
            revision: Revision,
            _start_empty: bool,
        ) -> WcResult<()> {
            self.0
                .push(Call::Link(url.to_string(), path.to_string(), revision));
            Ok(())
        }
        fn finish_report(&mut self) -> WcResult<()> {
            self.0.push(Call::Finish);
            Ok(())
        }
        fn abort_report(&mut self) -> WcResult<()> {
            self.0.push(Call::Abort);
            Ok(())
        }
    }

    fn build_wc(root: &std::path::Path) -> WorkingCopy {
        let options = WcOptions::default();
        let area = AdminArea::create(
            root,
            "http://repo/trunk",
            None,
            Some(Uuid::nil()),
            Revision::new(4),
            &options,
        )
        .unwrap();
        WorkingCopy::from_area(root, options, area)
    }

    fn seed_file(wc: &mut WorkingCopy, dir: &str, name: &str, revision: Revision) {
        let area = wc.area(dir).unwrap().unwrap();
        std::fs::write(area.file(name), b"content\n").unwrap();
        std::fs::write(area.text_base_path(name), b"content\n").unwrap();
        let entry = area.entries_mut().add_entry(name);
        entry.kind = NodeKind::File;
        entry.revision = revision;
        entry.url = Some(format!("http://repo/trunk/{name}"));
        area.save_entries(false).unwrap();
    }

    fn report(wc: &mut WorkingCopy) -> Vec<Call> {
        let mut sink = RecordingSink::default();
        let mut reporter = Reporter::new(wc, Canceller::new(), true, None);
        reporter.run(&mut sink).unwrap();
        sink.0
    }

    #[test]
    fn clean_tree_reports_only_the_root() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        seed_file(&mut wc, "", "a.txt", Revision::new(4));
        seed_file(&mut wc, "", "b.txt", Revision::new(4));

        let calls = report(&mut wc);
        assert_eq!(
            calls,
            vec![
                Call::Set(String::new(), Revision::new(4), false),
                Call::Finish
            ]
        );
    }

    #[test]
    fn rerunning_over_unmodified_tree_is_a_noop_report() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        seed_file(&mut wc, "", "a.txt", Revision::new(4));

        let first = report(&mut wc);
        let second = report(&mut wc);
        assert_eq!(first, second);
    }

    #[test]
    fn outdated_file_is_reported() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        seed_file(&mut wc, "", "old.txt", Revision::new(2));

        let calls = report(&mut wc);
        assert!(calls.contains(&Call::Set("old.txt".to_string(), Revision::new(2), false)));
    }

    #[test]
    fn tombstones_report_deletion() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        {
            let area = wc.area("").unwrap().unwrap();
            let entry = area.entries_mut().add_entry("gone.txt");
            entry.kind = NodeKind::File;
            entry.deleted = true;
            area.save_entries(false).unwrap();
        }
        let calls = report(&mut wc);
        assert!(calls.contains(&Call::Delete("gone.txt".to_string())));
    }

    #[test]
    fn scheduled_additions_are_skipped() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        {
            let area = wc.area("").unwrap().unwrap();
            std::fs::write(area.file("new.txt"), b"x").unwrap();
            let entry = area.entries_mut().add_entry("new.txt");
            entry.kind = NodeKind::File;
            entry.schedule_for_addition();
            area.save_entries(false).unwrap();
        }
        let calls = report(&mut wc);
        assert_eq!(
            calls,
            vec![
                Call::Set(String::new(), Revision::new(4), false),
                Call::Finish
            ]
        );
    }

    #[test]
    fn switched_file_is_linked() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        seed_file(&mut wc, "", "pinned.txt", Revision::new(4));
        {
            let area = wc.area("").unwrap().unwrap();
            let entry = area.entries_mut().entry_mut("pinned.txt", true).unwrap();
            entry.url = Some("http://repo/branches/fix/pinned.txt".to_string());
            area.save_entries(false).unwrap();
        }
        let calls = report(&mut wc);
        assert!(calls.contains(&Call::Link(
            "http://repo/branches/fix/pinned.txt".to_string(),
            "pinned.txt".to_string(),
            Revision::new(4)
        )));
    }

    #[test]
    fn missing_file_is_restored_before_reporting() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        seed_file(&mut wc, "", "a.txt", Revision::new(4));
        std::fs::remove_file(root.join("a.txt")).unwrap();

        let calls = report(&mut wc);
        assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), b"content\n");
        // Restored content matches the baseline, so it is not reported.
        assert_eq!(
            calls,
            vec![
                Call::Set(String::new(), Revision::new(4), false),
                Call::Finish
            ]
        );
    }

    #[test]
    fn nested_directory_at_baseline_is_omitted() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        let options = WcOptions::default();
        let sub = AdminArea::create(
            &root.join("sub"),
            "http://repo/trunk/sub",
            None,
            Some(Uuid::nil()),
            Revision::new(4),
            &options,
        )
        .unwrap();
        wc.add_area("sub", sub);
        {
            let area = wc.area("").unwrap().unwrap();
            let entry = area.entries_mut().add_entry("sub");
            entry.kind = NodeKind::Dir;
            entry.revision = Revision::new(4);
            entry.url = Some("http://repo/trunk/sub".to_string());
            area.save_entries(false).unwrap();
        }
        seed_file(&mut wc, "sub", "inner.txt", Revision::new(4));

        let calls = report(&mut wc);
        assert_eq!(
            calls,
            vec![
                Call::Set(String::new(), Revision::new(4), false),
                Call::Finish
            ]
        );
    }

    #[test]
    fn errors_abort_the_report() {
        struct FailingSink(RecordingSink);
        impl ReportSink for FailingSink {
            fn set_path(
                &mut self,
                path: &str,
                lock: Option<&str>,
                revision: Revision,
                start_empty: bool,
            ) -> WcResult<()> {
                self.0.set_path(path, lock, revision, start_empty)
            }
            fn delete_path(&mut self, _path: &str) -> WcResult<()> {
                Err(WcError::corrupt("sink exploded"))
            }
            fn link_path(
                &mut self,
                url: &str,
                path: &str,
                lock: Option<&str>,
                revision: Revision,
                start_empty: bool,
            ) -> WcResult<()> {
                self.0.link_path(url, path, lock, revision, start_empty)
            }
            fn finish_report(&mut self) -> WcResult<()> {
                self.0.finish_report()
            }
            fn abort_report(&mut self) -> WcResult<()> {
                self.0.abort_report()
            }
        }

        let temp = tempdir().unwrap();
        let root = temp.path().join("wc");
        let mut wc = build_wc(&root);
        {
            let area = wc.area("").unwrap().unwrap();
            let entry = area.entries_mut().add_entry("gone.txt");
            entry.kind = NodeKind::File;
            entry.deleted = true;
            area.save_entries(false).unwrap();
        }

        let mut sink = FailingSink(RecordingSink::default());
        let mut reporter = Reporter::new(&mut wc, Canceller::new(), true, None);
        assert!(reporter.run(&mut sink).is_err());
        assert_eq!(sink.0 .0.last(), Some(&Call::Abort));
    }
}

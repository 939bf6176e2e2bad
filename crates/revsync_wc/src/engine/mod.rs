//! The merge/apply engine.
//!
//! An external tree-delta driver pushes per-path events into the engine:
//! directory added/deleted, file added/deleted/changed, properties
//! changed. Each handler classifies the on-disk state against the
//! tracking entries, reconciles content three-way, funnels every
//! mutation through the directory's change log, and answers with a
//! [`MergeOutcome`]. Outcomes are data, never errors: an obstructed or
//! conflicted path does not stop the walk.
//!
//! In dry-run mode nothing is written; paths the walk would have added
//! are remembered so later sibling events classify against the
//! simulated tree.

mod events;

pub use events::{Event, EventAction, EventHandler};

use crate::admin::AdminArea;
use crate::cancel::Canceller;
use crate::changelog::Command;
use crate::checksum;
use crate::entries::fields;
use crate::error::{WcError, WcResult};
use crate::merge::{merge_file, merge_props};
use crate::paths;
use crate::props::PropDiff;
use crate::types::{is_binary_mime, FileOutcome, MergeLabels, MergeOutcome, NodeKind, Revision};
use crate::workingcopy::WorkingCopy;
use events::{DispatcherGuard, EventSlot, Silent, SuppressUnder};
use revsync_delta::{apply_windows, DeltaWindow};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Options for one merge/apply pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Compute outcomes without mutating anything.
    pub dry_run: bool,
    /// Delete locally modified paths instead of reporting Obstructed.
    pub force: bool,
    /// Never write conflict markers; report `ConflictedUnresolved` and
    /// leave resolution to the caller.
    pub leave_conflicts: bool,
}

/// Read access to repository content, injected by the caller.
///
/// The engine uses it when an event announces content to fetch rather
/// than shipping it inline.
pub trait RepositoryReader {
    /// Writes the content of `repo_path` at `revision` into `dst`.
    fn read_file(
        &self,
        repo_path: &str,
        revision: Revision,
        dst: &mut dyn Write,
    ) -> WcResult<()>;
}

/// Incoming content for a file event.
#[derive(Debug, Clone, Copy)]
pub enum FileContent<'a> {
    /// The full new text, already fetched to a local file.
    Full(&'a Path),
    /// Delta windows to apply against the base text.
    Delta(&'a [DeltaWindow]),
    /// Pull the full text through the [`RepositoryReader`].
    Fetch,
}

/// The text half of a file event.
#[derive(Debug, Clone, Copy)]
pub struct TextChange<'a> {
    /// The base the incoming change was made against, already fetched.
    /// `None` means the recorded pristine base, verified against the
    /// entry's checksum before use.
    pub base: Option<&'a Path>,
    /// The incoming content.
    pub content: FileContent<'a>,
}

/// One file-level event from the tree-delta driver.
#[derive(Debug, Clone)]
pub struct FileEvent<'a> {
    /// Working-copy path of the file.
    pub path: &'a str,
    /// Content change, if any.
    pub text: Option<TextChange<'a>>,
    /// Revision the incoming change starts from.
    pub left_revision: Revision,
    /// Revision the incoming change leads to.
    pub right_revision: Revision,
    /// MIME type at the left revision.
    pub mime_type_old: Option<&'a str>,
    /// MIME type at the right revision.
    pub mime_type_new: Option<&'a str>,
    /// Property changes (`None` value = deletion).
    pub prop_diff: PropDiff,
}

/// Applies a stream of tree-delta events to a working copy.
///
/// Directory locks are taken parent-first as events descend and released
/// LIFO by [`MergeEngine::finish`] (or on drop, should the walk unwind).
pub struct MergeEngine<'a> {
    wc: &'a mut WorkingCopy,
    reader: &'a dyn RepositoryReader,
    url: String,
    target_revision: Revision,
    options: MergeOptions,
    canceller: Canceller,
    events: EventSlot,
    /// Dry-run bookkeeping: paths "added" by earlier events. A set, not
    /// a single prefix, so unrelated simultaneous additions classify
    /// correctly.
    pending_adds: BTreeSet<String>,
}

impl<'a> MergeEngine<'a> {
    /// Creates an engine applying changes from `url` at
    /// `target_revision`.
    pub fn new(
        wc: &'a mut WorkingCopy,
        reader: &'a dyn RepositoryReader,
        url: &str,
        target_revision: Revision,
        options: MergeOptions,
        canceller: Canceller,
        handler: Option<Rc<dyn EventHandler>>,
    ) -> Self {
        Self {
            wc,
            reader,
            url: url.trim_end_matches('/').to_string(),
            target_revision,
            options,
            canceller,
            events: events::new_slot(handler),
            pending_adds: BTreeSet::new(),
        }
    }

    /// Finishes the pass, releasing every held lock (children first).
    pub fn finish(self) -> WcResult<()> {
        // Drop performs the unlock; surface any lock-release error by
        // doing it explicitly first.
        self.wc.unlock_all()
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{path}", self.url)
    }

    fn under_pending_add(&self, path: &str) -> bool {
        self.pending_adds
            .iter()
            .any(|added| paths::is_under(path, added))
    }

    /// Outcome for a path whose parent store is absent.
    fn missing_outcome(&self, path: &str) -> MergeOutcome {
        if self.options.dry_run && self.under_pending_add(path) {
            // Keep dry-run bookkeeping consistent: the parent would
            // exist by now.
            MergeOutcome::Changed
        } else {
            MergeOutcome::Missing
        }
    }

    /// Handles a directory appearing in the incoming tree.
    pub fn dir_added(&mut self, path: &str) -> WcResult<MergeOutcome> {
        self.canceller.check()?;
        let (parent, name) = paths::split(path);
        if self.wc.area(parent)?.is_none() {
            return Ok(self.missing_outcome(path));
        }

        let (kind, live_entry, tombstoned) = {
            let area = self.wc.area(parent)?.expect("parent checked above");
            let entry = area.entry(name, true);
            (
                area.on_disk_kind(name),
                entry.is_some_and(|e| !e.is_hidden() && !e.is_scheduled_for_deletion()),
                entry.is_some_and(|e| e.is_scheduled_for_deletion()),
            )
        };
        match kind {
            NodeKind::File => Ok(MergeOutcome::Obstructed),
            NodeKind::None | NodeKind::Dir => {
                if live_entry {
                    return Ok(MergeOutcome::Obstructed);
                }
                if self.options.dry_run {
                    self.pending_adds.insert(path.to_string());
                } else {
                    self.apply_dir_add(parent, name, path, tombstoned)?;
                    events::send(&self.events, path, EventAction::Added);
                }
                Ok(MergeOutcome::Changed)
            }
        }
    }

    fn apply_dir_add(
        &mut self,
        parent: &str,
        name: &str,
        path: &str,
        replace_deleted: bool,
    ) -> WcResult<()> {
        self.wc.lock_area(parent)?;
        let url = self.url_for(path);
        let revision = self.target_revision;

        let (child_abs, repository_root, uuid) = {
            let area = self.wc.area(parent)?.expect("parent is versioned");
            let (repository_root, uuid) = match area.entries().this_dir() {
                Some(root) => (root.repository_root.clone(), root.uuid),
                None => (None, None),
            };
            let entry = area.entries_mut().add_entry(name);
            if replace_deleted {
                entry.schedule_for_replacement()?;
            } else {
                entry.schedule_for_addition();
            }
            entry.kind = NodeKind::Dir;
            entry.set_copy_from(&url, revision);
            area.save_entries(true)?;
            (area.file(name), repository_root, uuid)
        };

        fs::create_dir_all(&child_abs)?;
        if AdminArea::is_versioned(&child_abs) {
            let area = self.wc.area(path)?.expect("child is versioned");
            let root = area.entries_mut().add_entry("");
            if root.is_scheduled_for_deletion() {
                root.schedule_for_replacement()?;
            }
            root.set_copy_from(&url, revision);
            area.save_entries(true)?;
        } else {
            let mut child = AdminArea::create(
                &child_abs,
                &url,
                repository_root.as_deref(),
                uuid,
                revision,
                &self.wc.options().clone(),
            )?;
            let root = child.entries_mut().add_entry("");
            root.schedule_for_addition();
            root.set_copy_from(&url, revision);
            child.save_entries(true)?;
            self.wc.add_area(path, child);
        }
        debug!(path, "added directory");
        Ok(())
    }

    /// Handles a directory disappearing from the incoming tree.
    ///
    /// Child notifications cascading from the schedule walk are
    /// suppressed for the duration; the original dispatcher is restored
    /// on every exit path, cancellation included.
    pub fn dir_deleted(&mut self, path: &str) -> WcResult<MergeOutcome> {
        self.canceller.check()?;
        let (parent, name) = paths::split(path);
        if self.wc.area(parent)?.is_none() {
            return Ok(self.missing_outcome(path));
        }
        let kind = {
            let area = self.wc.area(parent)?.expect("parent checked above");
            area.on_disk_kind(name)
        };
        match kind {
            NodeKind::File => Ok(MergeOutcome::Obstructed),
            NodeKind::None => Ok(MergeOutcome::Missing),
            NodeKind::Dir => {
                let saved = self.events.borrow().clone();
                let guard = DispatcherGuard::swap(
                    &self.events,
                    Some(Rc::new(SuppressUnder {
                        base: path.to_string(),
                        inner: saved,
                    })),
                );
                let result = self.delete_dir_inner(parent, name, path);
                drop(guard);
                let outcome = result?;
                if outcome == MergeOutcome::Changed && !self.options.dry_run {
                    events::send(&self.events, path, EventAction::Deleted);
                }
                Ok(outcome)
            }
        }
    }

    fn delete_dir_inner(
        &mut self,
        parent: &str,
        name: &str,
        path: &str,
    ) -> WcResult<MergeOutcome> {
        if !self.options.force && self.subtree_has_local_changes(path)? {
            return Ok(MergeOutcome::Obstructed);
        }
        if self.options.dry_run {
            return Ok(MergeOutcome::Changed);
        }
        self.wc.lock_area(parent)?;
        {
            let area = self.wc.area(parent)?.expect("parent is versioned");
            let mut log = area.log()?;
            log.add_command(Command::ModifyEntry {
                name: name.to_string(),
                fields: BTreeMap::from([(
                    fields::SCHEDULE.to_string(),
                    "delete".to_string(),
                )]),
            });
            log.save()?;
            area.run_logs()?;
        }
        self.schedule_tree_delete(path)?;
        debug!(path, "scheduled directory deletion");
        Ok(MergeOutcome::Changed)
    }

    /// Marks every entry under `rel` as scheduled for deletion.
    fn schedule_tree_delete(&mut self, rel: &str) -> WcResult<()> {
        self.canceller.check()?;
        if self.wc.area(rel)?.is_none() {
            return Ok(());
        }
        self.wc.lock_area(rel)?;
        let subdirs = {
            let area = self.wc.area(rel)?.expect("checked above");
            let mut names = Vec::new();
            let mut subdirs = Vec::new();
            for entry in area.entries().iter_all() {
                names.push(entry.name.clone());
                if entry.kind == NodeKind::Dir && !entry.name.is_empty() {
                    subdirs.push(paths::join(rel, &entry.name));
                }
            }
            let mut log = area.log()?;
            for name in names {
                log.add_command(Command::ModifyEntry {
                    name,
                    fields: BTreeMap::from([(
                        fields::SCHEDULE.to_string(),
                        "delete".to_string(),
                    )]),
                });
            }
            log.save()?;
            area.run_logs()?;
            subdirs
        };
        for subdir in subdirs {
            self.schedule_tree_delete(&subdir)?;
            events::send(&self.events, &subdir, EventAction::Deleted);
        }
        Ok(())
    }

    /// True when anything under the directory `rel` is locally modified
    /// or locally scheduled.
    fn subtree_has_local_changes(&mut self, rel: &str) -> WcResult<bool> {
        self.canceller.check()?;
        let Some(_) = self.wc.area(rel)? else {
            // No admin area to consult: refuse to judge the subtree.
            return Ok(true);
        };
        let (files, subdirs) = {
            let area = self.wc.area(rel)?.expect("checked above");
            let mut files = Vec::new();
            let mut subdirs = Vec::new();
            for entry in area.entries().iter() {
                if entry.name.is_empty() {
                    continue;
                }
                if entry.schedule != crate::types::Schedule::Normal {
                    return Ok(true);
                }
                match entry.kind {
                    NodeKind::File => files.push(entry.name.clone()),
                    NodeKind::Dir => subdirs.push(paths::join(rel, &entry.name)),
                    NodeKind::None => {}
                }
            }
            (files, subdirs)
        };
        for file in files {
            let area = self.wc.area(rel)?.expect("checked above");
            if area.has_text_modifications(&file)? {
                return Ok(true);
            }
        }
        for subdir in subdirs {
            if self.subtree_has_local_changes(&subdir)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Handles a file appearing in the incoming tree.
    pub fn file_added(&mut self, event: &FileEvent<'_>) -> WcResult<FileOutcome> {
        self.canceller.check()?;
        let (parent, name) = paths::split(event.path);
        if self.wc.area(parent)?.is_none() {
            let outcome = self.missing_outcome(event.path);
            let props = if outcome == MergeOutcome::Changed && !event.prop_diff.is_empty() {
                MergeOutcome::Changed
            } else if outcome == MergeOutcome::Changed {
                MergeOutcome::Unknown
            } else {
                outcome
            };
            return Ok(FileOutcome {
                text: outcome,
                props,
            });
        }

        let (kind, live_entry) = {
            let area = self.wc.area(parent)?.expect("parent checked above");
            let entry = area.entry(name, true);
            (
                area.on_disk_kind(name),
                entry.is_some_and(|e| !e.is_hidden() && !e.is_scheduled_for_deletion()),
            )
        };
        match kind {
            NodeKind::None => {
                if live_entry {
                    // A recorded entry whose file is missing: obstruction.
                    return Ok(FileOutcome {
                        text: MergeOutcome::Obstructed,
                        props: MergeOutcome::Unknown,
                    });
                }
                if !self.options.dry_run {
                    self.apply_file_add(parent, name, event)?;
                    events::send(&self.events, event.path, EventAction::Added);
                }
                Ok(FileOutcome {
                    text: MergeOutcome::Changed,
                    props: if event.prop_diff.is_empty() {
                        MergeOutcome::Unknown
                    } else {
                        MergeOutcome::Changed
                    },
                })
            }
            NodeKind::Dir => Ok(FileOutcome {
                text: MergeOutcome::Obstructed,
                props: MergeOutcome::Unknown,
            }),
            NodeKind::File => {
                if live_entry {
                    // Already versioned here: treat as a change.
                    self.file_changed(event)
                } else {
                    // An unversioned file squats on the path.
                    Ok(FileOutcome {
                        text: MergeOutcome::Obstructed,
                        props: MergeOutcome::Unknown,
                    })
                }
            }
        }
    }

    fn apply_file_add(
        &mut self,
        parent: &str,
        name: &str,
        event: &FileEvent<'_>,
    ) -> WcResult<()> {
        self.wc.lock_area(parent)?;
        let url = self.url_for(event.path);
        let revision = self.target_revision;
        let theirs_tmp = self.materialize_theirs(parent, name, event)?;

        let area = self.wc.area(parent)?.expect("parent is versioned");
        let checksum = checksum::file_sha256_hex(&theirs_tmp)?;
        let schedule = if area
            .entry(name, true)
            .is_some_and(|e| e.is_scheduled_for_deletion())
        {
            "replace"
        } else {
            "add"
        };

        let root = area.root().to_path_buf();
        let rel = |p: &Path| {
            p.strip_prefix(&root)
                .unwrap_or(p)
                .to_string_lossy()
                .into_owned()
        };

        // Incoming properties become both base and working props. The
        // files are created even when empty so a later diff can tell
        // "empty" from "missing".
        let mut incoming_props = crate::props::PropMap::new();
        for (key, value) in &event.prop_diff {
            if let Some(value) = value {
                incoming_props.insert(key.clone(), value.clone());
            }
        }
        let working_tmp = area.tmp_file("props")?;
        let base_tmp = area.tmp_file("props")?;
        crate::props::write_props(&working_tmp, &incoming_props)?;
        crate::props::write_props(&base_tmp, &incoming_props)?;

        let mut log = area.log()?;
        log.add_command(Command::Move {
            src: rel(&working_tmp),
            dst: rel(&area.prop_path(name)),
        });
        log.add_command(Command::Move {
            src: rel(&base_tmp),
            dst: rel(&area.prop_base_path(name)),
        });
        log.add_command(Command::ReadOnly {
            path: rel(&area.prop_base_path(name)),
        });
        log.add_command(Command::ModifyEntry {
            name: name.to_string(),
            fields: BTreeMap::from([
                (fields::KIND.to_string(), "file".to_string()),
                (fields::REVISION.to_string(), revision.as_i64().to_string()),
                (fields::URL.to_string(), url.clone()),
                (fields::SCHEDULE.to_string(), schedule.to_string()),
                (fields::COPIED.to_string(), "true".to_string()),
                (fields::COPYFROM_URL.to_string(), url),
                (
                    fields::COPYFROM_REVISION.to_string(),
                    revision.as_i64().to_string(),
                ),
                (fields::CHECKSUM.to_string(), checksum),
                (fields::DELETED.to_string(), "false".to_string()),
                (fields::ABSENT.to_string(), "false".to_string()),
            ]),
        });
        log.add_command(Command::Move {
            src: rel(&theirs_tmp),
            dst: rel(&area.text_base_path(name)),
        });
        log.add_command(Command::ReadOnly {
            path: rel(&area.text_base_path(name)),
        });
        log.add_command(Command::CopyAndTranslate {
            src: rel(&area.text_base_path(name)),
            dst: name.to_string(),
            expand: true,
        });
        log.add_command(Command::ModifyEntry {
            name: name.to_string(),
            fields: BTreeMap::from([
                (
                    fields::TEXT_TIME.to_string(),
                    fields::WORKING_TIME.to_string(),
                ),
                (
                    fields::PROP_TIME.to_string(),
                    fields::WORKING_TIME.to_string(),
                ),
            ]),
        });
        log.save()?;
        area.run_logs()?;
        debug!(path = event.path, "added file");
        Ok(())
    }

    /// Handles a file deletion.
    pub fn file_deleted(&mut self, path: &str) -> WcResult<MergeOutcome> {
        self.canceller.check()?;
        let (parent, name) = paths::split(path);
        if self.wc.area(parent)?.is_none() {
            return Ok(self.missing_outcome(path));
        }
        let kind = {
            let area = self.wc.area(parent)?.expect("parent checked above");
            area.on_disk_kind(name)
        };
        match kind {
            NodeKind::Dir => Ok(MergeOutcome::Obstructed),
            NodeKind::None => Ok(MergeOutcome::Missing),
            NodeKind::File => {
                let guard = DispatcherGuard::swap(&self.events, Some(Rc::new(Silent)));
                let result = self.delete_file_inner(parent, name);
                drop(guard);
                let outcome = result?;
                if outcome == MergeOutcome::Changed && !self.options.dry_run {
                    events::send(&self.events, path, EventAction::Deleted);
                }
                Ok(outcome)
            }
        }
    }

    fn delete_file_inner(&mut self, parent: &str, name: &str) -> WcResult<MergeOutcome> {
        let refuse = if self.options.force {
            false
        } else {
            let schedule_busy = {
                let area = self.wc.area(parent)?.expect("parent is versioned");
                area.entry(name, true)
                    .is_none_or(|e| e.schedule != crate::types::Schedule::Normal)
            };
            if schedule_busy {
                true
            } else {
                let area = self.wc.area(parent)?.expect("parent is versioned");
                area.has_text_modifications(name)?
            }
        };
        if refuse {
            return Ok(MergeOutcome::Obstructed);
        }
        if self.options.dry_run {
            return Ok(MergeOutcome::Changed);
        }
        self.wc.lock_area(parent)?;
        let area = self.wc.area(parent)?.expect("parent is versioned");
        let mut log = area.log()?;
        log.add_command(Command::Delete {
            path: name.to_string(),
        });
        log.add_command(Command::ModifyEntry {
            name: name.to_string(),
            fields: BTreeMap::from([(fields::SCHEDULE.to_string(), "delete".to_string())]),
        });
        log.save()?;
        area.run_logs()?;
        debug!(name, "scheduled file deletion");
        Ok(MergeOutcome::Changed)
    }

    /// Handles a file content/property change.
    pub fn file_changed(&mut self, event: &FileEvent<'_>) -> WcResult<FileOutcome> {
        self.canceller.check()?;
        let (parent, name) = paths::split(event.path);
        if self.wc.area(parent)?.is_none() {
            let outcome = self.missing_outcome(event.path);
            return Ok(FileOutcome::both(outcome));
        }
        {
            let area = self.wc.area(parent)?.expect("parent checked above");
            if area.on_disk_kind(name) != NodeKind::File || area.entry(name, false).is_none() {
                return Ok(FileOutcome::both(MergeOutcome::Missing));
            }
        }

        let props = if event.prop_diff.is_empty() {
            MergeOutcome::Unchanged
        } else {
            if !self.options.dry_run {
                self.wc.lock_area(parent)?;
            }
            let dry_run = self.options.dry_run;
            let area = self.wc.area(parent)?.expect("parent is versioned");
            merge_props(area, name, &event.prop_diff, dry_run)?
        };

        let text = match &event.text {
            Some(change) => self.apply_text_change(parent, name, event, change)?,
            None => MergeOutcome::Unchanged,
        };

        if !self.options.dry_run {
            let action = if text.is_conflict() || props.is_conflict() {
                EventAction::Conflicted
            } else {
                EventAction::Updated
            };
            events::send(&self.events, event.path, action);
        }
        Ok(FileOutcome { text, props })
    }

    fn apply_text_change(
        &mut self,
        parent: &str,
        name: &str,
        event: &FileEvent<'_>,
        change: &TextChange<'_>,
    ) -> WcResult<MergeOutcome> {
        let dry_run = self.options.dry_run;
        if !dry_run {
            self.wc.lock_area(parent)?;
        }
        let text_modified = {
            let area = self.wc.area(parent)?.expect("parent is versioned");
            area.has_text_modifications(name)?
        };
        let base_path: PathBuf = match change.base {
            Some(path) => path.to_path_buf(),
            None => {
                let area = self.wc.area(parent)?.expect("parent is versioned");
                verify_recorded_base(area, name)?;
                area.text_base_path(name)
            }
        };
        let theirs_tmp = self.materialize_theirs(parent, name, event)?;

        let binary = is_binary_mime(event.mime_type_old) || is_binary_mime(event.mime_type_new);
        let labels = MergeLabels::for_revisions(event.left_revision, event.right_revision);

        let merge_result = if binary {
            self.merge_binary(parent, name, &base_path, &theirs_tmp, &labels, text_modified)?
        } else {
            let leave_conflicts = self.options.leave_conflicts;
            let area = self.wc.area(parent)?.expect("parent is versioned");
            merge_file(
                area,
                name,
                &base_path,
                &theirs_tmp,
                &labels,
                leave_conflicts,
                dry_run,
            )?
        };
        if theirs_tmp.exists() {
            let _ = fs::remove_file(&theirs_tmp);
        }

        // Conflicts surface as-is; otherwise a locally modified file was
        // merged, a clean replacement is a change, and a no-op stays
        // unchanged.
        Ok(if merge_result.is_conflict() {
            merge_result
        } else if text_modified {
            MergeOutcome::Merged
        } else if merge_result == MergeOutcome::Merged {
            MergeOutcome::Changed
        } else {
            MergeOutcome::Unchanged
        })
    }

    /// Binary content is never text-merged: an unmodified local copy
    /// whose base matches the incoming base is replaced outright;
    /// anything else conflicts, preserving all three sides.
    fn merge_binary(
        &mut self,
        parent: &str,
        name: &str,
        base_path: &Path,
        theirs_tmp: &Path,
        labels: &MergeLabels,
        text_modified: bool,
    ) -> WcResult<MergeOutcome> {
        let dry_run = self.options.dry_run;
        let area = self.wc.area(parent)?.expect("parent is versioned");

        let mine_tmp = area.detranslated_working(name)?;
        let unchanged_locally =
            !text_modified && fs::read(&mine_tmp)? == fs::read(base_path)?;
        let _ = fs::remove_file(&mine_tmp);

        let root = area.root().to_path_buf();
        let rel = |p: &Path| {
            p.strip_prefix(&root)
                .unwrap_or(p)
                .to_string_lossy()
                .into_owned()
        };

        if unchanged_locally {
            if !dry_run {
                // Rename into place; the incoming copy is already in its
                // final form, no translation applies to binaries.
                let staged = area.tmp_file("binary")?;
                fs::copy(theirs_tmp, &staged)?;
                let mut log = area.log()?;
                log.add_command(Command::Move {
                    src: rel(&staged),
                    dst: name.to_string(),
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
            }
            return Ok(MergeOutcome::Merged);
        }

        if !dry_run {
            let backups = [
                (area.file(name), format!("{name}{}", labels.target)),
                (base_path.to_path_buf(), format!("{name}{}", labels.left)),
                (theirs_tmp.to_path_buf(), format!("{name}{}", labels.right)),
            ];
            let mut log = area.log()?;
            for (src, dst) in backups {
                let staged = area.tmp_file("backup")?;
                fs::copy(&src, &staged)?;
                log.add_command(Command::Move {
                    src: rel(&staged),
                    dst,
                });
            }
            log.save()?;
            area.run_logs()?;
        }
        Ok(MergeOutcome::Conflicted)
    }

    /// Handles a property-only change for a file or directory.
    pub fn props_changed(&mut self, path: &str, diff: &PropDiff) -> WcResult<MergeOutcome> {
        self.canceller.check()?;
        if diff.is_empty() {
            return Ok(MergeOutcome::Unchanged);
        }
        let dry_run = self.options.dry_run;

        // A directory carries its own properties.
        if self.wc.area(path)?.is_some() {
            if !dry_run {
                self.wc.lock_area(path)?;
            }
            let area = self.wc.area(path)?.expect("checked above");
            return merge_props(area, "", diff, dry_run);
        }

        let (parent, name) = paths::split(path);
        if self.wc.area(parent)?.is_none() {
            return Ok(self.missing_outcome(path));
        }
        {
            let area = self.wc.area(parent)?.expect("parent checked above");
            if area.entry(name, false).is_none() {
                return Ok(MergeOutcome::Missing);
            }
        }
        if !dry_run {
            self.wc.lock_area(parent)?;
        }
        let area = self.wc.area(parent)?.expect("parent is versioned");
        merge_props(area, name, diff, dry_run)
    }

    /// Produces the incoming text as a scratch file inside the area.
    fn materialize_theirs(
        &mut self,
        parent: &str,
        name: &str,
        event: &FileEvent<'_>,
    ) -> WcResult<PathBuf> {
        let tmp = {
            let area = self.wc.area(parent)?.expect("parent is versioned");
            area.tmp_file("theirs")?
        };
        let Some(change) = &event.text else {
            return Ok(tmp);
        };
        match change.content {
            FileContent::Full(path) => {
                fs::copy(path, &tmp)?;
            }
            FileContent::Delta(windows) => {
                let base_bytes = match change.base {
                    Some(path) => fs::read(path)?,
                    None => {
                        let area = self.wc.area(parent)?.expect("parent is versioned");
                        verify_recorded_base(area, name)?;
                        fs::read(area.text_base_path(name))?
                    }
                };
                let target = apply_windows(windows, &base_bytes)?;
                fs::write(&tmp, target)?;
            }
            FileContent::Fetch => {
                let mut file = fs::File::create(&tmp)?;
                self.reader
                    .read_file(event.path, event.right_revision, &mut file)?;
            }
        }
        Ok(tmp)
    }
}

impl Drop for MergeEngine<'_> {
    fn drop(&mut self) {
        // Locks must never outlive the pass, whatever path unwound here.
        let _ = self.wc.unlock_all();
    }
}

/// Checks the recorded pristine base of `name` against the entry's
/// checksum before it is used as a delta source.
fn verify_recorded_base(area: &AdminArea, name: &str) -> WcResult<()> {
    let Some(entry) = area.entry(name, true) else {
        return Ok(());
    };
    let Some(expected) = entry.checksum.clone() else {
        return Ok(());
    };
    let base = area.text_base_path(name);
    if !base.exists() {
        return Ok(());
    }
    let actual = checksum::file_sha256_hex(&base)?;
    if actual != expected {
        return Err(WcError::ChecksumMismatch {
            path: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

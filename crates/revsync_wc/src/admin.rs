//! Per-directory admin area.
//!
//! Every versioned directory carries a `.revsync` control directory:
//!
//! ```text
//! <dir>/.revsync/
//! ├─ entries            # tracking-entry store
//! ├─ lock               # sentinel lock file
//! ├─ log, log.1, …      # pending change logs
//! ├─ text-base/         # pristine normalized file texts
//! ├─ props/             # working properties per file
//! ├─ prop-base/         # base properties per file
//! ├─ dir-props          # working properties of the directory itself
//! ├─ dir-prop-base      # base properties of the directory itself
//! └─ tmp/               # scratch space, always same-filesystem
//! ```
//!
//! The lock is a plain sentinel: creating it fails loudly when it
//! already exists, and there is no owner fencing. A stale lock is
//! removed by an explicit cleanup pass, never implicitly.

use crate::changelog::ChangeLog;
use crate::config::WcOptions;
use crate::entries::{Entry, EntryStore, THIS_DIR};
use crate::error::{WcError, WcResult};
use crate::props::{self, names, PropMap};
use crate::translate::{self, compute_keywords, KeywordMap, KeywordValues};
use crate::types::{NodeKind, Revision};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Name of the admin directory.
pub const ADMIN_DIR: &str = ".revsync";

const ENTRIES_FILE: &str = "entries";
const LOCK_FILE: &str = "lock";
const LOG_FILE: &str = "log";
const TEXT_BASE_DIR: &str = "text-base";
const PROPS_DIR: &str = "props";
const PROP_BASE_DIR: &str = "prop-base";
const DIR_PROPS_FILE: &str = "dir-props";
const DIR_PROP_BASE_FILE: &str = "dir-prop-base";
const TMP_DIR: &str = "tmp";

/// Process-wide suffix source for scratch file names.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One versioned directory: its path, options and entry store.
///
/// Areas are constructed explicitly and owned by the working copy; there
/// is no lazy global cache. Invalidation is dropping the area and
/// re-opening it.
#[derive(Debug)]
pub struct AdminArea {
    root: PathBuf,
    entries: EntryStore,
    options: WcOptions,
    locked: bool,
}

impl AdminArea {
    /// Opens the admin area of an existing versioned directory.
    ///
    /// # Errors
    ///
    /// Returns [`WcError::NotVersioned`] when there is no entry store.
    pub fn open(dir: &Path, options: &WcOptions) -> WcResult<Self> {
        let entries_path = dir.join(ADMIN_DIR).join(ENTRIES_FILE);
        if !entries_path.exists() {
            return Err(WcError::not_versioned(dir.display().to_string()));
        }
        Ok(Self {
            root: dir.to_path_buf(),
            entries: EntryStore::open(&entries_path)?,
            options: options.clone(),
            locked: false,
        })
    }

    /// Creates a fresh admin area for `dir`, recording its own entry.
    ///
    /// The directory itself is created when missing. The root entry is
    /// left at `schedule = normal`; callers scheduling an addition
    /// adjust it before saving.
    pub fn create(
        dir: &Path,
        url: &str,
        repository_root: Option<&str>,
        uuid: Option<Uuid>,
        revision: Revision,
        options: &WcOptions,
    ) -> WcResult<Self> {
        fs::create_dir_all(dir)?;
        let admin = dir.join(ADMIN_DIR);
        fs::create_dir_all(admin.join(TEXT_BASE_DIR))?;
        fs::create_dir_all(admin.join(PROPS_DIR))?;
        fs::create_dir_all(admin.join(PROP_BASE_DIR))?;
        fs::create_dir_all(admin.join(TMP_DIR))?;

        let mut entries = EntryStore::create(&admin.join(ENTRIES_FILE));
        let root = entries.add_entry(THIS_DIR);
        root.kind = NodeKind::Dir;
        root.revision = revision;
        root.url = Some(url.to_string());
        root.repository_root = repository_root.map(str::to_string);
        root.uuid = uuid;
        entries.save()?;

        debug!(dir = %dir.display(), url, "created admin area");
        Ok(Self {
            root: dir.to_path_buf(),
            entries,
            options: options.clone(),
            locked: false,
        })
    }

    /// True when `dir` carries an admin area.
    #[must_use]
    pub fn is_versioned(dir: &Path) -> bool {
        dir.join(ADMIN_DIR).join(ENTRIES_FILE).exists()
    }

    /// The versioned directory this area controls.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Options inherited from the working copy.
    #[must_use]
    pub fn options(&self) -> &WcOptions {
        &self.options
    }

    fn admin_path(&self) -> PathBuf {
        self.root.join(ADMIN_DIR)
    }

    /// The working path of a child; the empty name is the directory
    /// itself.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        if name.is_empty() {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }

    /// Path of a file's pristine normalized text.
    #[must_use]
    pub fn text_base_path(&self, name: &str) -> PathBuf {
        self.admin_path()
            .join(TEXT_BASE_DIR)
            .join(format!("{name}.base"))
    }

    /// Path of the working property file for `name` (the directory's own
    /// when `name` is empty).
    #[must_use]
    pub fn prop_path(&self, name: &str) -> PathBuf {
        if name.is_empty() {
            self.admin_path().join(DIR_PROPS_FILE)
        } else {
            self.admin_path().join(PROPS_DIR).join(format!("{name}.props"))
        }
    }

    /// Path of the base property file for `name`.
    #[must_use]
    pub fn prop_base_path(&self, name: &str) -> PathBuf {
        if name.is_empty() {
            self.admin_path().join(DIR_PROP_BASE_FILE)
        } else {
            self.admin_path()
                .join(PROP_BASE_DIR)
                .join(format!("{name}.props"))
        }
    }

    /// Claims a fresh scratch file path under `tmp/`.
    ///
    /// The file is created empty so concurrent claims cannot collide,
    /// and lives on the same filesystem as the working files so a final
    /// rename is atomic.
    pub fn tmp_file(&self, hint: &str) -> WcResult<PathBuf> {
        let tmp_dir = self.admin_path().join(TMP_DIR);
        fs::create_dir_all(&tmp_dir)?;
        loop {
            let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let candidate = tmp_dir.join(format!("{hint}.{n}.tmp"));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Acquires the directory's sentinel lock.
    ///
    /// # Errors
    ///
    /// Returns [`WcError::Locked`] when the sentinel already exists.
    /// Stale sentinels require an explicit cleanup.
    pub fn lock(&mut self) -> WcResult<()> {
        if self.locked {
            return Ok(());
        }
        let lock_path = self.admin_path().join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {
                self.locked = true;
                debug!(dir = %self.root.display(), "locked");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(WcError::Locked {
                path: self.root.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Releases the sentinel lock. A no-op when not held.
    pub fn unlock(&mut self) -> WcResult<()> {
        if !self.locked {
            return Ok(());
        }
        let lock_path = self.admin_path().join(LOCK_FILE);
        if lock_path.exists() {
            fs::remove_file(&lock_path)?;
        }
        self.locked = false;
        debug!(dir = %self.root.display(), "unlocked");
        Ok(())
    }

    /// True when a lock sentinel is present on disk, whoever made it.
    #[must_use]
    pub fn is_lock_present(&self) -> bool {
        self.admin_path().join(LOCK_FILE).exists()
    }

    /// Removes a lock sentinel regardless of owner. Cleanup only.
    pub fn break_lock(&mut self) -> WcResult<()> {
        let lock_path = self.admin_path().join(LOCK_FILE);
        if lock_path.exists() {
            fs::remove_file(&lock_path)?;
            debug!(dir = %self.root.display(), "removed stale lock");
        }
        self.locked = false;
        Ok(())
    }

    /// The entry store, read-only.
    #[must_use]
    pub fn entries(&self) -> &EntryStore {
        &self.entries
    }

    /// The entry store, for mutation. Changes stay in memory until
    /// [`AdminArea::save_entries`].
    pub fn entries_mut(&mut self) -> &mut EntryStore {
        &mut self.entries
    }

    /// Persists the entry store. With `stay_locked` the directory lock
    /// is kept for a following batch of changes; otherwise it is
    /// released.
    pub fn save_entries(&mut self, stay_locked: bool) -> WcResult<()> {
        self.entries.save()?;
        if !stay_locked {
            self.unlock()?;
        }
        Ok(())
    }

    /// Working properties of `name` (empty map when none recorded).
    pub fn props(&self, name: &str) -> WcResult<PropMap> {
        props::read_props_or_empty(&self.prop_path(name))
    }

    /// Base properties of `name`.
    pub fn base_props(&self, name: &str) -> WcResult<PropMap> {
        props::read_props_or_empty(&self.prop_base_path(name))
    }

    /// Guarantees the working and base property files of `name` exist on
    /// disk, creating them empty when missing, so later property diffs
    /// can tell "empty properties" from "no file".
    pub fn ensure_prop_files(&self, name: &str) -> WcResult<()> {
        for path in [self.prop_path(name), self.prop_base_path(name)] {
            if !path.exists() {
                props::write_props(&path, &PropMap::new())?;
            }
        }
        Ok(())
    }

    /// Resolves the translation parameters for `name`: EOL bytes,
    /// keyword map and the special flag, in the requested direction.
    pub fn translation_for(
        &self,
        name: &str,
        expand: bool,
    ) -> WcResult<(Option<Vec<u8>>, KeywordMap, bool)> {
        let file_props = self.props(name)?;
        let special = file_props.contains_key(names::SPECIAL);
        let eol = match file_props.get(names::EOL_STYLE) {
            Some(style) if expand => Some(
                translate::eol_for_style(style, &self.options.native_eol)
                    .ok_or_else(|| {
                        WcError::corrupt(format!("unknown eol style '{style}'"))
                    })?
                    .to_vec(),
            ),
            // Normalized form always uses bare LF.
            Some(_) => Some(b"\n".to_vec()),
            None => None,
        };
        let keywords = match file_props.get(names::KEYWORDS) {
            Some(list) => {
                let entry = self.entries.entry(name, true);
                let revision = entry
                    .map(|e| e.committed_revision.as_i64().to_string())
                    .unwrap_or_default();
                let values = KeywordValues {
                    name,
                    url: entry.and_then(|e| e.url.as_deref()),
                    revision: Some(&revision),
                    author: entry.and_then(|e| e.committed_author.as_deref()),
                    date: entry.and_then(|e| e.committed_date.as_deref()),
                };
                compute_keywords(list, &values, expand)
            }
            None => KeywordMap::new(),
        };
        Ok((eol, keywords, special))
    }

    /// Translates `src` into the working form of `name`, in place.
    pub fn translate_to_working(&self, name: &str, src: &Path) -> WcResult<()> {
        let (eol, keywords, special) = self.translation_for(name, true)?;
        translate::translate_file(
            src,
            &self.file(name),
            eol.as_deref(),
            &keywords,
            special,
            true,
            true,
        )
    }

    /// Copies the working file of `name` into a scratch file in
    /// normalized form, for byte comparison against pristine bases.
    pub fn detranslated_working(&self, name: &str) -> WcResult<PathBuf> {
        let (eol, keywords, special) = self.translation_for(name, false)?;
        let tmp = self.tmp_file(name)?;
        translate::translate_file(
            &self.file(name),
            &tmp,
            eol.as_deref(),
            &keywords,
            special,
            false,
            true,
        )?;
        Ok(tmp)
    }

    /// True when the working text of `name` differs from its pristine
    /// base.
    ///
    /// The recorded text timestamp short-circuits the check: a matching
    /// on-disk mtime means unmodified without reading the file.
    pub fn has_text_modifications(&self, name: &str) -> WcResult<bool> {
        let Some(entry) = self.entries.entry(name, true) else {
            return Ok(false);
        };
        if entry.kind != NodeKind::File {
            return Ok(false);
        }
        let path = self.file(name);
        if !path.exists() {
            return Ok(false);
        }
        if let Some(text_time) = entry.text_time {
            if fs::metadata(&path)?.modified()? == text_time {
                return Ok(false);
            }
        }
        let base = self.text_base_path(name);
        if !base.exists() {
            return Ok(true);
        }
        let tmp = self.detranslated_working(name)?;
        let modified = fs::read(&tmp)? != fs::read(&base)?;
        let _ = fs::remove_file(&tmp);
        Ok(modified)
    }

    /// Classifies what actually sits on disk at `name`.
    #[must_use]
    pub fn on_disk_kind(&self, name: &str) -> NodeKind {
        let path = self.file(name);
        match fs::symlink_metadata(&path) {
            Err(_) => NodeKind::None,
            Ok(meta) if meta.is_dir() => NodeKind::Dir,
            // Symlinks count as files: they are tracked as special files.
            Ok(_) => NodeKind::File,
        }
    }

    /// Starts a new change log for this directory.
    ///
    /// Logs are numbered so a batch interrupted mid-run and a fresh one
    /// can coexist; [`AdminArea::run_logs`] replays them in order.
    pub fn log(&self) -> WcResult<ChangeLog> {
        let admin = self.admin_path();
        let mut index = 0u32;
        loop {
            let path = if index == 0 {
                admin.join(LOG_FILE)
            } else {
                admin.join(format!("{LOG_FILE}.{index}"))
            };
            if !path.exists() {
                return Ok(ChangeLog::new(&path));
            }
            index += 1;
        }
    }

    /// Replays every persisted change log in order. Re-entrant: safe to
    /// call again after a crash part-way through.
    ///
    /// Log files are removed only after the whole batch has run, and in
    /// reverse order, so an interruption always leaves a contiguous
    /// prefix for the next replay to find.
    pub fn run_logs(&mut self) -> WcResult<()> {
        let admin = self.admin_path();
        let mut pending = Vec::new();
        let mut index = 0u32;
        loop {
            let path = if index == 0 {
                admin.join(LOG_FILE)
            } else {
                admin.join(format!("{LOG_FILE}.{index}"))
            };
            if !path.exists() {
                break;
            }
            pending.push(path);
            index += 1;
        }
        for path in &pending {
            let log = ChangeLog::load(path)?;
            log.run(self)?;
            debug!(dir = %self.root.display(), log = %path.display(), "replayed change log");
        }
        for path in pending.iter().rev() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Convenience lookup joining store access and hidden filtering.
    #[must_use]
    pub fn entry(&self, name: &str, include_hidden: bool) -> Option<&Entry> {
        self.entries.entry(name, include_hidden)
    }
}

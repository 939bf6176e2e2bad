//! The working copy: a tree of admin areas under one root.
//!
//! Admin areas are opened explicitly and cached by relative path; the
//! working copy owns them for the duration of an operation. Locks are
//! taken parent-before-child as an operation descends and released
//! child-before-parent (LIFO) at the end, so a parent is never free
//! while a child operation is outstanding.

use crate::admin::AdminArea;
use crate::config::WcOptions;
use crate::error::{WcError, WcResult};
use crate::paths;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One working-copy tree rooted at a versioned directory.
#[derive(Debug)]
pub struct WorkingCopy {
    root: PathBuf,
    options: WcOptions,
    areas: BTreeMap<String, AdminArea>,
    lock_stack: Vec<String>,
}

impl WorkingCopy {
    /// Opens a working copy whose root is already versioned.
    pub fn open(root: &Path, options: WcOptions) -> WcResult<Self> {
        if !AdminArea::is_versioned(root) {
            return Err(WcError::not_versioned(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            options,
            areas: BTreeMap::new(),
            lock_stack: Vec::new(),
        })
    }

    /// Builds a working copy around a just-created root area.
    pub fn from_area(root: &Path, options: WcOptions, area: AdminArea) -> Self {
        let mut areas = BTreeMap::new();
        areas.insert(String::new(), area);
        Self {
            root: root.to_path_buf(),
            options,
            areas,
            lock_stack: Vec::new(),
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The shared options.
    #[must_use]
    pub fn options(&self) -> &WcOptions {
        &self.options
    }

    /// Absolute path of a relative working-copy path.
    #[must_use]
    pub fn abs_path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// True when `rel` is a versioned directory on disk.
    #[must_use]
    pub fn is_versioned_dir(&self, rel: &str) -> bool {
        AdminArea::is_versioned(&self.abs_path(rel))
    }

    /// The admin area at `rel`, opened and cached on first use.
    /// Returns `None` for unversioned paths.
    pub fn area(&mut self, rel: &str) -> WcResult<Option<&mut AdminArea>> {
        if !self.areas.contains_key(rel) {
            let abs = self.abs_path(rel);
            if !AdminArea::is_versioned(&abs) {
                return Ok(None);
            }
            let area = AdminArea::open(&abs, &self.options)?;
            self.areas.insert(rel.to_string(), area);
        }
        Ok(self.areas.get_mut(rel))
    }

    /// Registers a freshly created area under `rel`.
    pub fn add_area(&mut self, rel: &str, area: AdminArea) {
        self.areas.insert(rel.to_string(), area);
    }

    /// Drops the cached area at `rel`; the next access re-reads disk.
    pub fn invalidate(&mut self, rel: &str) {
        self.areas.remove(rel);
    }

    /// Locks the area at `rel`, recording it for LIFO release.
    ///
    /// # Errors
    ///
    /// [`WcError::NotVersioned`] when there is no area,
    /// [`WcError::Locked`] when someone else holds the sentinel.
    pub fn lock_area(&mut self, rel: &str) -> WcResult<()> {
        if self.lock_stack.iter().any(|held| held == rel) {
            return Ok(());
        }
        let rel_owned = rel.to_string();
        let area = self
            .area(rel)?
            .ok_or_else(|| WcError::not_versioned(rel))?;
        area.lock()?;
        self.lock_stack.push(rel_owned);
        Ok(())
    }

    /// Releases every held lock, children before parents.
    pub fn unlock_all(&mut self) -> WcResult<()> {
        while let Some(rel) = self.lock_stack.pop() {
            if let Some(area) = self.areas.get_mut(&rel) {
                area.unlock()?;
            }
        }
        Ok(())
    }

    /// Operator cleanup: replays every leftover change log under `root`
    /// and removes stale lock sentinels, depth-first.
    ///
    /// This is the explicit remedy for a crashed operation: pending logs
    /// finish their work, then the tree is unlocked.
    pub fn cleanup(&mut self) -> WcResult<()> {
        self.areas.clear();
        self.lock_stack.clear();
        self.cleanup_dir(String::new())
    }

    fn cleanup_dir(&mut self, rel: String) -> WcResult<()> {
        let abs = self.abs_path(&rel);
        let mut area = AdminArea::open(&abs, &self.options)?;
        area.run_logs()?;
        area.break_lock()?;
        debug!(dir = %abs.display(), "cleaned up");

        let mut subdirs = Vec::new();
        for dir_entry in fs::read_dir(&abs)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == crate::admin::ADMIN_DIR {
                continue;
            }
            let child_rel = paths::join(&rel, name);
            if self.is_versioned_dir(&child_rel) {
                subdirs.push(child_rel);
            }
        }
        for child in subdirs {
            self.cleanup_dir(child)?;
        }
        Ok(())
    }
}

//! Per-directory tracking-entry store.
//!
//! Each versioned directory records its children (and itself, under the
//! empty name) in an `entries` file inside the admin area:
//!
//! ```text
//! revsync-entries-1
//! name=
//! kind=dir
//! revision=12
//! url=http://repo/trunk
//!
//! name=foo.txt
//! kind=file
//! revision=12
//! ```
//!
//! Blocks are separated by blank lines; values are percent-escaped so
//! they may carry newlines. Mutations stay in memory until
//! [`EntryStore::save`] persists them with a write-then-rename.

mod entry;

pub use entry::{fields, format_time, parse_time, Entry};

use crate::error::{WcError, WcResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the directory's own entry.
pub const THIS_DIR: &str = "";

/// Magic first line of the entries file.
const ENTRIES_MAGIC: &str = "revsync-entries-1";

/// In-memory view of one directory's entries file.
#[derive(Debug)]
pub struct EntryStore {
    path: PathBuf,
    entries: BTreeMap<String, Entry>,
}

impl EntryStore {
    /// Creates an empty store that will persist to `path`.
    #[must_use]
    pub fn create(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads a store from disk.
    ///
    /// # Errors
    ///
    /// Returns corruption for a bad magic line, unknown fields or
    /// malformed values; I/O errors pass through.
    pub fn open(path: &Path) -> WcResult<Self> {
        let data = fs::read_to_string(path)?;
        let mut lines = data.lines();
        if lines.next() != Some(ENTRIES_MAGIC) {
            return Err(WcError::corrupt(format!(
                "entries file '{}': bad magic",
                path.display()
            )));
        }
        let mut entries = BTreeMap::new();
        let mut current: Option<Entry> = None;
        for line in lines {
            if line.is_empty() {
                if let Some(entry) = current.take() {
                    entries.insert(entry.name.clone(), entry);
                }
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                WcError::corrupt(format!(
                    "entries file '{}': malformed line '{line}'",
                    path.display()
                ))
            })?;
            let value = unescape(value)?;
            if key == fields::NAME {
                if let Some(entry) = current.take() {
                    entries.insert(entry.name.clone(), entry);
                }
                current = Some(Entry::new(&value));
            } else {
                let entry = current.as_mut().ok_or_else(|| {
                    WcError::corrupt(format!(
                        "entries file '{}': field before first name",
                        path.display()
                    ))
                })?;
                entry.set_field(key, &value)?;
            }
        }
        if let Some(entry) = current.take() {
            entries.insert(entry.name.clone(), entry);
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Path of the persisted file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up an entry. Hidden (tombstoned) entries are returned only
    /// when `include_hidden` is set; that is the default for "does this
    /// exist" checks made with `false`.
    #[must_use]
    pub fn entry(&self, name: &str, include_hidden: bool) -> Option<&Entry> {
        self.entries
            .get(name)
            .filter(|e| include_hidden || !e.is_hidden())
    }

    /// Mutable entry lookup with the same hidden-filtering rule.
    pub fn entry_mut(&mut self, name: &str, include_hidden: bool) -> Option<&mut Entry> {
        self.entries
            .get_mut(name)
            .filter(|e| include_hidden || !e.is_hidden())
    }

    /// The directory's own entry.
    #[must_use]
    pub fn this_dir(&self) -> Option<&Entry> {
        self.entries.get(THIS_DIR)
    }

    /// Adds (or resurrects) an entry and returns it for initialization.
    pub fn add_entry(&mut self, name: &str) -> &mut Entry {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| Entry::new(name))
    }

    /// Purges an entry completely. Ordinary deletion never does this; it
    /// records `schedule=delete` instead so the history survives for a
    /// revert.
    pub fn remove_entry(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Iterates non-hidden entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values().filter(|e| !e.is_hidden())
    }

    /// Iterates every entry, tombstones included.
    pub fn iter_all(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Persists the store with a write-then-rename.
    ///
    /// # Errors
    ///
    /// Fails without touching the old file when an entry violates the
    /// copy-provenance invariant (URL and revision set together).
    pub fn save(&mut self) -> WcResult<()> {
        for entry in self.entries.values() {
            let has_url = entry.copy_from_url.is_some();
            let has_rev = entry.copy_from_revision.is_valid();
            if has_url != has_rev {
                return Err(WcError::corrupt(format!(
                    "entry '{}': copy-from URL and revision must be set together",
                    entry.name
                )));
            }
        }
        let mut out = String::new();
        out.push_str(ENTRIES_MAGIC);
        out.push('\n');
        for entry in self.entries.values() {
            for (key, value) in entry.to_fields() {
                out.push_str(key);
                out.push('=');
                out.push_str(&escape(&value));
                out.push('\n');
            }
            out.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, out.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> WcResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let pair: String = chars.by_ref().take(2).collect();
        match pair.as_str() {
            "25" => out.push('%'),
            "0A" => out.push('\n'),
            "0D" => out.push('\r'),
            _ => {
                return Err(WcError::corrupt(format!(
                    "bad escape '%{pair}' in entries file"
                )))
            }
        }
    }
    Ok(out)
}

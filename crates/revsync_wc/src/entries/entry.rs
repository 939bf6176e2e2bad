//! A single tracking entry.

use crate::error::{WcError, WcResult};
use crate::types::{NodeKind, Revision, Schedule};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Field keys shared by the entry store format and the change log's
/// modify-entry command.
pub mod fields {
    /// Local path segment; empty for the directory's own entry.
    pub const NAME: &str = "name";
    /// Node kind.
    pub const KIND: &str = "kind";
    /// Base revision.
    pub const REVISION: &str = "revision";
    /// Repository URL of the entry.
    pub const URL: &str = "url";
    /// Repository root URL.
    pub const REPOS_ROOT: &str = "repos-root";
    /// Repository UUID.
    pub const UUID: &str = "uuid";
    /// Schedule state.
    pub const SCHEDULE: &str = "schedule";
    /// Copy provenance flag.
    pub const COPIED: &str = "copied";
    /// Copy source URL.
    pub const COPYFROM_URL: &str = "copyfrom-url";
    /// Copy source revision.
    pub const COPYFROM_REVISION: &str = "copyfrom-revision";
    /// Repository lock token held locally.
    pub const LOCK_TOKEN: &str = "lock-token";
    /// Checksum of the pristine base text (hex SHA-256).
    pub const CHECKSUM: &str = "checksum";
    /// Last committed revision of this node.
    pub const COMMITTED_REVISION: &str = "committed-revision";
    /// Author of the last commit.
    pub const COMMITTED_AUTHOR: &str = "committed-author";
    /// Date of the last commit.
    pub const COMMITTED_DATE: &str = "committed-date";
    /// Last known on-disk mtime of the working text (microseconds).
    pub const TEXT_TIME: &str = "text-time";
    /// Last known on-disk mtime of the property file (microseconds).
    pub const PROP_TIME: &str = "prop-time";
    /// Directory whose children are not fully populated.
    pub const INCOMPLETE: &str = "incomplete";
    /// Tombstone: recorded as deleted in the repository.
    pub const DELETED: &str = "deleted";
    /// Present in the repository but unreadable here.
    pub const ABSENT: &str = "absent";
    /// Special file (symlink placeholder).
    pub const SPECIAL: &str = "special";
    /// File must stay read-only until a lock is held.
    pub const NEEDS_LOCK: &str = "needs-lock";

    /// Sentinel timestamp value meaning "the file's current mtime",
    /// resolved by the change-log runner at execution time.
    pub const WORKING_TIME: &str = "working";
}

/// Metadata record for one versioned path within a directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// Local segment; empty for the directory's own entry.
    pub name: String,
    /// Recorded node kind.
    pub kind: NodeKind,
    /// Base revision; [`Revision::UNKNOWN`] when inherited.
    pub revision: Revision,
    /// Repository URL.
    pub url: Option<String>,
    /// Repository root URL.
    pub repository_root: Option<String>,
    /// Repository UUID.
    pub uuid: Option<Uuid>,
    /// Pending local intention.
    pub schedule: Schedule,
    /// True when this entry was created by a copy.
    pub copied: bool,
    /// Copy source URL; set together with `copy_from_revision`.
    pub copy_from_url: Option<String>,
    /// Copy source revision; set together with `copy_from_url`.
    pub copy_from_revision: Revision,
    /// Repository lock token held locally.
    pub lock_token: Option<String>,
    /// Hex SHA-256 of the pristine base text.
    pub checksum: Option<String>,
    /// Last committed revision.
    pub committed_revision: Revision,
    /// Last commit author.
    pub committed_author: Option<String>,
    /// Last commit date (opaque repository-formatted string).
    pub committed_date: Option<String>,
    /// Last known working-text mtime; used to short-circuit
    /// modification checks.
    pub text_time: Option<SystemTime>,
    /// Last known property-file mtime.
    pub prop_time: Option<SystemTime>,
    /// Directory children not fully populated.
    pub incomplete: bool,
    /// Tombstone marker.
    pub deleted: bool,
    /// Unreadable-here marker.
    pub absent: bool,
    /// Symlink placeholder.
    pub special: bool,
    /// Stays read-only until locked.
    pub needs_lock: bool,
}

impl Entry {
    /// Creates an entry with everything at its unknown/default state.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            revision: Revision::UNKNOWN,
            copy_from_revision: Revision::UNKNOWN,
            committed_revision: Revision::UNKNOWN,
            ..Self::default()
        }
    }

    /// True when the entry is a tombstone that ordinary lookups and
    /// iteration must skip. An entry being re-added over its tombstone
    /// is visible again.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        (self.deleted || self.absent)
            && !matches!(self.schedule, Schedule::Add | Schedule::Replace)
    }

    /// True when scheduled for addition (including replacement).
    #[must_use]
    pub fn is_scheduled_for_addition(&self) -> bool {
        matches!(self.schedule, Schedule::Add | Schedule::Replace)
    }

    /// True when scheduled for deletion.
    #[must_use]
    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.schedule == Schedule::Delete
    }

    /// Marks the entry as scheduled for addition.
    pub fn schedule_for_addition(&mut self) {
        self.schedule = Schedule::Add;
    }

    /// Marks the entry as scheduled for deletion.
    pub fn schedule_for_deletion(&mut self) {
        self.schedule = Schedule::Delete;
    }

    /// Upgrades a pending deletion to a replacement.
    ///
    /// # Errors
    ///
    /// Replacement is only reachable from a pending deletion; any other
    /// starting state is a caller bug surfaced as corruption.
    pub fn schedule_for_replacement(&mut self) -> WcResult<()> {
        if self.schedule != Schedule::Delete {
            return Err(WcError::corrupt(format!(
                "entry '{}': replacement scheduled from {:?}",
                self.name, self.schedule
            )));
        }
        self.schedule = Schedule::Replace;
        Ok(())
    }

    /// Records copy provenance; URL and revision are always set together.
    pub fn set_copy_from(&mut self, url: &str, revision: Revision) {
        self.copied = true;
        self.copy_from_url = Some(url.to_string());
        self.copy_from_revision = revision;
    }

    /// Clears copy provenance.
    pub fn clear_copy_from(&mut self) {
        self.copied = false;
        self.copy_from_url = None;
        self.copy_from_revision = Revision::UNKNOWN;
    }

    /// Applies one persisted field to the entry.
    ///
    /// Shared by the entry store reader and the change log's
    /// modify-entry command, so both speak the same field set.
    ///
    /// # Errors
    ///
    /// Returns corruption for an unknown key or an unparsable value.
    pub fn set_field(&mut self, key: &str, value: &str) -> WcResult<()> {
        let bad = |what: &str| {
            WcError::corrupt(format!("entry field {key}: invalid {what} '{value}'"))
        };
        match key {
            fields::NAME => self.name = value.to_string(),
            fields::KIND => {
                self.kind = NodeKind::from_str(value).ok_or_else(|| bad("kind"))?;
            }
            fields::REVISION => {
                self.revision = Revision::new(value.parse().map_err(|_| bad("revision"))?);
            }
            fields::URL => self.url = Some(value.to_string()),
            fields::REPOS_ROOT => self.repository_root = Some(value.to_string()),
            fields::UUID => {
                self.uuid = Some(Uuid::parse_str(value).map_err(|_| bad("uuid"))?);
            }
            fields::SCHEDULE => {
                self.schedule = Schedule::from_str(value).ok_or_else(|| bad("schedule"))?;
            }
            fields::COPIED => self.copied = parse_bool(value).ok_or_else(|| bad("flag"))?,
            fields::COPYFROM_URL => self.copy_from_url = Some(value.to_string()),
            fields::COPYFROM_REVISION => {
                self.copy_from_revision =
                    Revision::new(value.parse().map_err(|_| bad("revision"))?);
            }
            fields::LOCK_TOKEN => self.lock_token = Some(value.to_string()),
            fields::CHECKSUM => self.checksum = Some(value.to_string()),
            fields::COMMITTED_REVISION => {
                self.committed_revision =
                    Revision::new(value.parse().map_err(|_| bad("revision"))?);
            }
            fields::COMMITTED_AUTHOR => self.committed_author = Some(value.to_string()),
            fields::COMMITTED_DATE => self.committed_date = Some(value.to_string()),
            fields::TEXT_TIME => {
                self.text_time = Some(parse_time(value).ok_or_else(|| bad("timestamp"))?);
            }
            fields::PROP_TIME => {
                self.prop_time = Some(parse_time(value).ok_or_else(|| bad("timestamp"))?);
            }
            fields::INCOMPLETE => {
                self.incomplete = parse_bool(value).ok_or_else(|| bad("flag"))?;
            }
            fields::DELETED => self.deleted = parse_bool(value).ok_or_else(|| bad("flag"))?,
            fields::ABSENT => self.absent = parse_bool(value).ok_or_else(|| bad("flag"))?,
            fields::SPECIAL => self.special = parse_bool(value).ok_or_else(|| bad("flag"))?,
            fields::NEEDS_LOCK => {
                self.needs_lock = parse_bool(value).ok_or_else(|| bad("flag"))?;
            }
            _ => {
                return Err(WcError::corrupt(format!("unknown entry field '{key}'")));
            }
        }
        Ok(())
    }

    /// Serializes the entry as (key, value) pairs, skipping fields at
    /// their default state. The name is always present.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![(fields::NAME, self.name.clone())];
        if self.kind != NodeKind::None {
            out.push((fields::KIND, self.kind.as_str().to_string()));
        }
        if self.revision != Revision::UNKNOWN {
            out.push((fields::REVISION, self.revision.as_i64().to_string()));
        }
        if let Some(url) = &self.url {
            out.push((fields::URL, url.clone()));
        }
        if let Some(root) = &self.repository_root {
            out.push((fields::REPOS_ROOT, root.clone()));
        }
        if let Some(uuid) = &self.uuid {
            out.push((fields::UUID, uuid.to_string()));
        }
        if self.schedule != Schedule::Normal {
            out.push((fields::SCHEDULE, self.schedule.as_str().to_string()));
        }
        if self.copied {
            out.push((fields::COPIED, "true".to_string()));
        }
        if let Some(url) = &self.copy_from_url {
            out.push((fields::COPYFROM_URL, url.clone()));
        }
        if self.copy_from_revision != Revision::UNKNOWN {
            out.push((
                fields::COPYFROM_REVISION,
                self.copy_from_revision.as_i64().to_string(),
            ));
        }
        if let Some(token) = &self.lock_token {
            out.push((fields::LOCK_TOKEN, token.clone()));
        }
        if let Some(checksum) = &self.checksum {
            out.push((fields::CHECKSUM, checksum.clone()));
        }
        if self.committed_revision != Revision::UNKNOWN {
            out.push((
                fields::COMMITTED_REVISION,
                self.committed_revision.as_i64().to_string(),
            ));
        }
        if let Some(author) = &self.committed_author {
            out.push((fields::COMMITTED_AUTHOR, author.clone()));
        }
        if let Some(date) = &self.committed_date {
            out.push((fields::COMMITTED_DATE, date.clone()));
        }
        if let Some(time) = self.text_time {
            out.push((fields::TEXT_TIME, format_time(time)));
        }
        if let Some(time) = self.prop_time {
            out.push((fields::PROP_TIME, format_time(time)));
        }
        if self.incomplete {
            out.push((fields::INCOMPLETE, "true".to_string()));
        }
        if self.deleted {
            out.push((fields::DELETED, "true".to_string()));
        }
        if self.absent {
            out.push((fields::ABSENT, "true".to_string()));
        }
        if self.special {
            out.push((fields::SPECIAL, "true".to_string()));
        }
        if self.needs_lock {
            out.push((fields::NEEDS_LOCK, "true".to_string()));
        }
        out
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Formats a timestamp as microseconds since the Unix epoch.
#[must_use]
pub fn format_time(time: SystemTime) -> String {
    let micros = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    micros.to_string()
}

/// Parses a microseconds-since-epoch timestamp.
#[must_use]
pub fn parse_time(value: &str) -> Option<SystemTime> {
    let micros: u64 = value.parse().ok()?;
    UNIX_EPOCH.checked_add(Duration::from_micros(micros))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_unknown_revisions() {
        let entry = Entry::new("foo");
        assert_eq!(entry.revision, Revision::UNKNOWN);
        assert_eq!(entry.copy_from_revision, Revision::UNKNOWN);
        assert_eq!(entry.schedule, Schedule::Normal);
    }

    #[test]
    fn replacement_only_from_deletion() {
        let mut entry = Entry::new("foo");
        assert!(entry.schedule_for_replacement().is_err());
        entry.schedule_for_deletion();
        entry.schedule_for_replacement().unwrap();
        assert_eq!(entry.schedule, Schedule::Replace);
    }

    #[test]
    fn hidden_tombstones_become_visible_when_readded() {
        let mut entry = Entry::new("foo");
        entry.deleted = true;
        assert!(entry.is_hidden());
        entry.schedule_for_addition();
        assert!(!entry.is_hidden());
    }

    #[test]
    fn copy_provenance_set_together() {
        let mut entry = Entry::new("foo");
        entry.set_copy_from("http://repo/foo", Revision::new(9));
        assert!(entry.copied);
        assert_eq!(entry.copy_from_revision, Revision::new(9));
        entry.clear_copy_from();
        assert!(!entry.copied);
        assert_eq!(entry.copy_from_url, None);
        assert_eq!(entry.copy_from_revision, Revision::UNKNOWN);
    }

    #[test]
    fn fields_roundtrip() {
        let mut entry = Entry::new("foo.txt");
        entry.kind = NodeKind::File;
        entry.revision = Revision::new(12);
        entry.url = Some("http://repo/trunk/foo.txt".to_string());
        entry.uuid = Some(Uuid::nil());
        entry.schedule = Schedule::Delete;
        entry.set_copy_from("http://repo/branch/foo.txt", Revision::new(10));
        entry.lock_token = Some("opaquelocktoken:abc".to_string());
        entry.checksum = Some("ab".repeat(32));
        entry.committed_revision = Revision::new(11);
        entry.committed_author = Some("alice".to_string());
        entry.committed_date = Some("2006-03-01T12:00:00.000000Z".to_string());
        entry.text_time = parse_time("1141216800000000");
        entry.needs_lock = true;

        let mut rebuilt = Entry::new("");
        for (key, value) in entry.to_fields() {
            rebuilt.set_field(key, &value).unwrap();
        }
        assert_eq!(rebuilt, entry);
    }

    #[test]
    fn unknown_field_is_corrupt() {
        let mut entry = Entry::new("foo");
        assert!(entry.set_field("bogus", "x").is_err());
    }

    #[test]
    fn timestamps_roundtrip() {
        let time = parse_time("1141216800123456").unwrap();
        assert_eq!(parse_time(&format_time(time)), Some(time));
    }
}

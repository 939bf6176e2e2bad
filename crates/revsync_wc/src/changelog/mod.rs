//! Crash-safe change logs.
//!
//! A change log records the primitive mutations of one working
//! directory, is persisted in full (terminator included) before any
//! command executes, and is deleted only after every command has run.
//! A crash in between leaves the log on disk; replaying it from the
//! start is safe because each primitive tolerates already-applied state.
//!
//! ## Record format
//!
//! ```text
//! | magic (4) | version (2) | verb (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is a flat key/value map (u16 pair count, then
//! length-prefixed keys and values). A `Terminator` record closes the
//! batch; a log without one was not fully written and refuses to run.
//!
//! ## Recovery policy
//!
//! - **Missing terminator** → the producing operation never finished
//!   writing; the log is corrupt and must not run.
//! - **CRC mismatch / bad magic / unknown verb** → data corruption,
//!   fatal.
//! - **Already-applied commands** (moved file already at destination,
//!   deleted file already gone) → tolerated, replay continues.

use crate::admin::AdminArea;
use crate::entries::fields;
use crate::error::{WcError, WcResult};
use crate::translate;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Magic bytes identifying a change-log record.
pub const LOG_MAGIC: [u8; 4] = *b"RLOG";

/// Current change-log format version.
pub const LOG_VERSION: u16 = 1;

const VERB_MOVE: u8 = 1;
const VERB_COPY_AND_TRANSLATE: u8 = 2;
const VERB_DELETE: u8 = 3;
const VERB_READONLY: u8 = 4;
const VERB_SET_TIMESTAMP: u8 = 5;
const VERB_MODIFY_ENTRY: u8 = 6;
const VERB_TERMINATOR: u8 = 0xFF;

const KEY_SRC: &str = "src";
const KEY_DST: &str = "dst";
const KEY_PATH: &str = "path";
const KEY_EXPAND: &str = "expand";
const KEY_TIME: &str = "time";

/// A timestamp argument for [`Command::SetTimestamp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampValue {
    /// The wall clock at execution time.
    Now,
    /// A stored instant.
    At(SystemTime),
}

impl TimestampValue {
    fn serialize(&self) -> String {
        match self {
            Self::Now => fields::WORKING_TIME.to_string(),
            Self::At(time) => crate::entries::format_time(*time),
        }
    }

    fn parse(value: &str) -> WcResult<Self> {
        if value == fields::WORKING_TIME {
            Ok(Self::Now)
        } else {
            crate::entries::parse_time(value)
                .map(Self::At)
                .ok_or_else(|| WcError::corrupt(format!("bad timestamp '{value}'")))
        }
    }
}

/// One primitive mutation. All paths are relative to the directory the
/// log belongs to and may reach into its admin area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rename `src` into place at `dst`.
    Move {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
    },
    /// Copy `src` to `dst` applying content translation. With `expand`
    /// the destination name's properties drive expansion to working
    /// form; otherwise the source name's properties drive normalization.
    CopyAndTranslate {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
        /// Translation direction.
        expand: bool,
    },
    /// Remove a file if present.
    Delete {
        /// Path to remove.
        path: String,
    },
    /// Mark a file read-only.
    ReadOnly {
        /// Path to mark.
        path: String,
    },
    /// Set a file's mtime.
    SetTimestamp {
        /// Path to stamp.
        path: String,
        /// Stored instant or "now".
        time: TimestampValue,
    },
    /// Set named fields on one tracking entry. The timestamp fields
    /// accept the sentinel value `working`, resolved to the file's
    /// actual mtime at execution time.
    ModifyEntry {
        /// Entry name within the directory's store.
        name: String,
        /// Field key → serialized value.
        fields: BTreeMap<String, String>,
    },
}

impl Command {
    fn verb(&self) -> u8 {
        match self {
            Self::Move { .. } => VERB_MOVE,
            Self::CopyAndTranslate { .. } => VERB_COPY_AND_TRANSLATE,
            Self::Delete { .. } => VERB_DELETE,
            Self::ReadOnly { .. } => VERB_READONLY,
            Self::SetTimestamp { .. } => VERB_SET_TIMESTAMP,
            Self::ModifyEntry { .. } => VERB_MODIFY_ENTRY,
        }
    }

    fn to_pairs(&self) -> Vec<(String, String)> {
        match self {
            Self::Move { src, dst } => vec![
                (KEY_SRC.to_string(), src.clone()),
                (KEY_DST.to_string(), dst.clone()),
            ],
            Self::CopyAndTranslate { src, dst, expand } => vec![
                (KEY_SRC.to_string(), src.clone()),
                (KEY_DST.to_string(), dst.clone()),
                (KEY_EXPAND.to_string(), expand.to_string()),
            ],
            Self::Delete { path } | Self::ReadOnly { path } => {
                vec![(KEY_PATH.to_string(), path.clone())]
            }
            Self::SetTimestamp { path, time } => vec![
                (KEY_PATH.to_string(), path.clone()),
                (KEY_TIME.to_string(), time.serialize()),
            ],
            Self::ModifyEntry { name, fields } => {
                let mut pairs = vec![(fields::NAME.to_string(), name.clone())];
                pairs.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                pairs
            }
        }
    }

    fn from_pairs(verb: u8, pairs: Vec<(String, String)>) -> WcResult<Self> {
        let mut map: BTreeMap<String, String> = pairs.into_iter().collect();
        let mut take = |key: &str| {
            map.remove(key)
                .ok_or_else(|| WcError::corrupt(format!("change log: missing key '{key}'")))
        };
        let command = match verb {
            VERB_MOVE => Self::Move {
                src: take(KEY_SRC)?,
                dst: take(KEY_DST)?,
            },
            VERB_COPY_AND_TRANSLATE => Self::CopyAndTranslate {
                src: take(KEY_SRC)?,
                dst: take(KEY_DST)?,
                expand: take(KEY_EXPAND)? == "true",
            },
            VERB_DELETE => Self::Delete { path: take(KEY_PATH)? },
            VERB_READONLY => Self::ReadOnly { path: take(KEY_PATH)? },
            VERB_SET_TIMESTAMP => Self::SetTimestamp {
                path: take(KEY_PATH)?,
                time: TimestampValue::parse(&take(KEY_TIME)?)?,
            },
            VERB_MODIFY_ENTRY => {
                let name = map.remove(fields::NAME).ok_or_else(|| {
                    WcError::corrupt("change log: modify-entry without a name")
                })?;
                Self::ModifyEntry { name, fields: map }
            }
            other => {
                return Err(WcError::corrupt(format!(
                    "change log: unknown verb {other}"
                )))
            }
        };
        Ok(command)
    }
}

/// An ordered batch of commands for one directory.
#[derive(Debug)]
pub struct ChangeLog {
    path: PathBuf,
    commands: Vec<Command>,
    saved: bool,
}

impl ChangeLog {
    /// Creates an empty, unsaved log that will persist to `path`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            commands: Vec::new(),
            saved: false,
        }
    }

    /// The log's on-disk path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when no command was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queues a command. Execution order is queueing order.
    pub fn add_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Persists the whole batch, terminator included, and syncs it to
    /// durable storage. Nothing executes before this returns.
    pub fn save(&mut self) -> WcResult<()> {
        let mut data = Vec::new();
        for command in &self.commands {
            encode_record(&mut data, command.verb(), &command.to_pairs());
        }
        encode_record(&mut data, VERB_TERMINATOR, &[]);
        let mut file = fs::File::create(&self.path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        self.saved = true;
        debug!(log = %self.path.display(), commands = self.commands.len(), "saved change log");
        Ok(())
    }

    /// Loads a persisted log.
    ///
    /// # Errors
    ///
    /// A log without its terminator was never fully written and is
    /// corrupt, as is any record with a bad magic, CRC or verb.
    pub fn load(path: &Path) -> WcResult<Self> {
        let data = fs::read(path)?;
        let mut commands = Vec::new();
        let mut pos = 0;
        loop {
            let (verb, pairs) = decode_record(&data, &mut pos)?;
            if verb == VERB_TERMINATOR {
                break;
            }
            commands.push(Command::from_pairs(verb, pairs)?);
        }
        Ok(Self {
            path: path.to_path_buf(),
            commands,
            saved: true,
        })
    }

    /// The queued commands, in execution order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Executes every command in order against `area`, then persists the
    /// entry store (keeping any directory lock held).
    ///
    /// Safe to re-run over the same persisted log: primitives tolerate
    /// already-applied state. The caller deletes the log file after a
    /// fully successful run; on failure the file stays for resume.
    ///
    /// # Errors
    ///
    /// Refuses to run a batch that was never persisted; the log must be
    /// durable before the first command executes.
    pub fn run(&self, area: &mut AdminArea) -> WcResult<()> {
        if !self.saved {
            return Err(WcError::corrupt(
                "change log executed before it was saved",
            ));
        }
        for command in &self.commands {
            run_command(command, area)?;
        }
        area.save_entries(true)?;
        Ok(())
    }
}

fn run_command(command: &Command, area: &mut AdminArea) -> WcResult<()> {
    match command {
        Command::Move { src, dst } => {
            let src_path = area.root().join(src);
            let dst_path = area.root().join(dst);
            if !src_path.exists() {
                if dst_path.exists() {
                    warn!(src, dst, "move already applied, skipping");
                    return Ok(());
                }
                return Err(WcError::corrupt(format!(
                    "change log: move source '{src}' is gone"
                )));
            }
            if dst_path.exists() {
                fs::remove_file(&dst_path)?;
            }
            fs::rename(&src_path, &dst_path)?;
        }
        Command::CopyAndTranslate { src, dst, expand } => {
            let src_path = area.root().join(src);
            let dst_path = area.root().join(dst);
            if !src_path.exists() {
                if dst_path.exists() {
                    warn!(src, dst, "copy source gone, destination present, skipping");
                    return Ok(());
                }
                return Err(WcError::corrupt(format!(
                    "change log: copy source '{src}' is gone"
                )));
            }
            let name = if *expand { dst.as_str() } else { src.as_str() };
            let (eol, keywords, special) = area.translation_for(name, *expand)?;
            translate::translate_file(
                &src_path,
                &dst_path,
                eol.as_deref(),
                &keywords,
                special,
                *expand,
                true,
            )?;
        }
        Command::Delete { path } => {
            let target = area.root().join(path);
            if target.exists() {
                fs::remove_file(&target)?;
            }
        }
        Command::ReadOnly { path } => {
            let target = area.root().join(path);
            if target.exists() {
                let mut perms = fs::metadata(&target)?.permissions();
                perms.set_readonly(true);
                fs::set_permissions(&target, perms)?;
            }
        }
        Command::SetTimestamp { path, time } => {
            let target = area.root().join(path);
            if !target.exists() {
                return Ok(());
            }
            let instant = match time {
                TimestampValue::Now => SystemTime::now(),
                TimestampValue::At(time) => *time,
            };
            let file = fs::OpenOptions::new().write(true).open(&target)?;
            file.set_modified(instant)?;
        }
        Command::ModifyEntry { name, fields: entry_fields } => {
            // Resolve "working" timestamps against the filesystem before
            // touching the store.
            let text_path = area.file(name);
            let prop_path = area.prop_path(name);
            let entry = area.entries_mut().add_entry(name);
            for (key, value) in entry_fields {
                if value == fields::WORKING_TIME
                    && (key == fields::TEXT_TIME || key == fields::PROP_TIME)
                {
                    let path = if key == fields::TEXT_TIME {
                        &text_path
                    } else {
                        &prop_path
                    };
                    let mtime = fs::metadata(path)?.modified()?;
                    if key == fields::TEXT_TIME {
                        entry.text_time = Some(mtime);
                    } else {
                        entry.prop_time = Some(mtime);
                    }
                } else {
                    entry.set_field(key, value)?;
                }
            }
        }
    }
    Ok(())
}

fn encode_record(out: &mut Vec<u8>, verb: u8, pairs: &[(String, String)]) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(pairs.len() as u16).to_le_bytes());
    for (key, value) in pairs {
        payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
        payload.extend_from_slice(key.as_bytes());
        payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
        payload.extend_from_slice(value.as_bytes());
    }

    let start = out.len();
    out.extend_from_slice(&LOG_MAGIC);
    out.extend_from_slice(&LOG_VERSION.to_le_bytes());
    out.push(verb);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    let crc = compute_crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
}

fn decode_record(data: &[u8], pos: &mut usize) -> WcResult<(u8, Vec<(String, String)>)> {
    let header_end = pos
        .checked_add(11)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| WcError::corrupt("change log not fully written"))?;
    let start = *pos;
    if data[start..start + 4] != LOG_MAGIC {
        return Err(WcError::corrupt("change log: bad record magic"));
    }
    let version = u16::from_le_bytes([data[start + 4], data[start + 5]]);
    if version != LOG_VERSION {
        return Err(WcError::corrupt(format!(
            "change log: unsupported version {version}"
        )));
    }
    let verb = data[start + 6];
    let length = u32::from_le_bytes([
        data[start + 7],
        data[start + 8],
        data[start + 9],
        data[start + 10],
    ]) as usize;
    let payload_end = header_end
        .checked_add(length)
        .filter(|&end| end + 4 <= data.len())
        .ok_or_else(|| WcError::corrupt("change log not fully written"))?;
    let crc_stored = u32::from_le_bytes([
        data[payload_end],
        data[payload_end + 1],
        data[payload_end + 2],
        data[payload_end + 3],
    ]);
    let crc_computed = compute_crc32(&data[start..payload_end]);
    if crc_stored != crc_computed {
        return Err(WcError::corrupt(format!(
            "change log: crc mismatch ({crc_stored:08x} != {crc_computed:08x})"
        )));
    }

    let payload = &data[header_end..payload_end];
    let mut pairs = Vec::new();
    let mut p = 0;
    let count = read_u16(payload, &mut p)?;
    for _ in 0..count {
        let key_len = read_u16(payload, &mut p)? as usize;
        let key = read_str(payload, &mut p, key_len)?;
        let value_len = read_u32(payload, &mut p)? as usize;
        let value = read_str(payload, &mut p, value_len)?;
        pairs.push((key, value));
    }
    *pos = payload_end + 4;
    Ok((verb, pairs))
}

fn read_u16(data: &[u8], pos: &mut usize) -> WcResult<u16> {
    if *pos + 2 > data.len() {
        return Err(WcError::corrupt("change log: truncated payload"));
    }
    let value = u16::from_le_bytes([data[*pos], data[*pos + 1]]);
    *pos += 2;
    Ok(value)
}

fn read_u32(data: &[u8], pos: &mut usize) -> WcResult<u32> {
    if *pos + 4 > data.len() {
        return Err(WcError::corrupt("change log: truncated payload"));
    }
    let value = u32::from_le_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]);
    *pos += 4;
    Ok(value)
}

fn read_str(data: &[u8], pos: &mut usize, len: usize) -> WcResult<String> {
    if *pos + len > data.len() {
        return Err(WcError::corrupt("change log: truncated payload"));
    }
    let s = std::str::from_utf8(&data[*pos..*pos + len])
        .map_err(|_| WcError::corrupt("change log: payload is not UTF-8"))?
        .to_string();
    *pos += len;
    Ok(s)
}

/// Computes a CRC32 checksum (IEEE polynomial).
fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

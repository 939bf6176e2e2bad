//! Property maps and their on-disk K/V format.
//!
//! Properties are name → value maps attached to versioned paths. The
//! persisted form is length-prefixed so values may contain any bytes:
//!
//! ```text
//! K 13
//! rev:eol-style
//! V 6
//! native
//! END
//! ```
//!
//! (The `K`/`V` counts are the byte lengths of the following line.)

use crate::error::{WcError, WcResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A property map.
pub type PropMap = BTreeMap<String, String>;

/// An incoming property diff: `None` means the property was deleted.
pub type PropDiff = BTreeMap<String, Option<String>>;

/// Well-known property names.
pub mod names {
    /// Line-ending style: `native`, `LF`, `CR` or `CRLF`.
    pub const EOL_STYLE: &str = "rev:eol-style";
    /// Space-separated keyword list to expand in working files.
    pub const KEYWORDS: &str = "rev:keywords";
    /// Marks a special file (symlink placeholder).
    pub const SPECIAL: &str = "rev:special";
    /// MIME type; anything not `text/*` is treated as binary.
    pub const MIME_TYPE: &str = "rev:mime-type";
    /// Marks files that should stay read-only until locked.
    pub const NEEDS_LOCK: &str = "rev:needs-lock";
    /// Marks executable files.
    pub const EXECUTABLE: &str = "rev:executable";
}

/// Reads a property file. A missing file is an error; use
/// [`read_props_or_empty`] where absence legitimately means "no
/// properties recorded yet".
pub fn read_props(path: &Path) -> WcResult<PropMap> {
    let data = fs::read(path)?;
    parse_props(&data).map_err(|message| {
        WcError::corrupt(format!(
            "property file '{}': {message}",
            path.display()
        ))
    })
}

/// Reads a property file, treating a missing file as an empty map.
pub fn read_props_or_empty(path: &Path) -> WcResult<PropMap> {
    if path.exists() {
        read_props(path)
    } else {
        Ok(PropMap::new())
    }
}

/// Writes a property file, replacing any existing content.
pub fn write_props(path: &Path, props: &PropMap) -> WcResult<()> {
    fs::write(path, serialize_props(props))?;
    Ok(())
}

/// Serializes a property map to its K/V form.
#[must_use]
pub fn serialize_props(props: &PropMap) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in props {
        out.extend_from_slice(format!("K {}\n", name.len()).as_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(format!("V {}\n", value.len()).as_bytes());
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(b"END\n");
    out
}

fn parse_props(data: &[u8]) -> Result<PropMap, String> {
    let mut props = PropMap::new();
    let mut pos = 0;
    loop {
        let line = read_line(data, &mut pos).ok_or("missing END terminator")?;
        if line == b"END" {
            return Ok(props);
        }
        let key_len = parse_count(line, b'K')?;
        let name = take_counted(data, &mut pos, key_len).ok_or("truncated key")?;
        let line = read_line(data, &mut pos).ok_or("missing value header")?;
        let value_len = parse_count(line, b'V')?;
        let value = take_counted(data, &mut pos, value_len).ok_or("truncated value")?;
        let name = String::from_utf8(name.to_vec()).map_err(|_| "key is not UTF-8")?;
        let value = String::from_utf8(value.to_vec()).map_err(|_| "value is not UTF-8")?;
        props.insert(name, value);
    }
}

fn read_line<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    if *pos >= data.len() {
        return None;
    }
    let start = *pos;
    let end = data[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| start + i)?;
    *pos = end + 1;
    Some(&data[start..end])
}

fn parse_count(line: &[u8], tag: u8) -> Result<usize, String> {
    if line.len() < 3 || line[0] != tag || line[1] != b' ' {
        return Err(format!("malformed {} line", char::from(tag)));
    }
    std::str::from_utf8(&line[2..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("malformed {} count", char::from(tag)))
}

fn take_counted<'a>(data: &'a [u8], pos: &mut usize, count: usize) -> Option<&'a [u8]> {
    let end = pos.checked_add(count)?;
    // The counted bytes are followed by a newline.
    if end >= data.len() || data[end] != b'\n' {
        return None;
    }
    let slice = &data[*pos..end];
    *pos = end + 1;
    Some(slice)
}

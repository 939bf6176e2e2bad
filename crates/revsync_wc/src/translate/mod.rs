//! Content translation between repository (normalized) and working forms.
//!
//! Translation covers three concerns:
//!
//! - line-ending normalization (`native`, `LF`, `CR`, `CRLF`);
//! - `$Keyword$` expansion and contraction;
//! - special files, stored normalized as `link TARGET` and materialized
//!   as symlinks in the working copy.
//!
//! When none of them applies, translation degrades to a plain byte copy.

mod keywords;

pub use keywords::{compute_keywords, KeywordMap, KeywordValues, KEYWORD_MAX_LEN};

use crate::error::{WcError, WcResult};
use std::fs;
use std::path::Path;

/// Lookahead window for the closing `$` of a keyword.
pub const KEYWORD_LOOKAHEAD: usize = 256;

/// Normalized representation prefix for special files.
const LINK_PREFIX: &[u8] = b"link ";

/// Resolves an EOL style property value to concrete bytes.
///
/// `native` resolves to `native_eol`; unknown styles resolve to `None`
/// so the caller can reject them.
#[must_use]
pub fn eol_for_style<'a>(style: &str, native_eol: &'a [u8]) -> Option<&'a [u8]> {
    match style {
        "native" => Some(native_eol),
        "LF" => Some(b"\n"),
        "CR" => Some(b"\r"),
        "CRLF" => Some(b"\r\n"),
        _ => None,
    }
}

/// The EOL bytes used for the normalized (repository) form of a file
/// that carries any EOL style.
#[must_use]
pub fn base_eol(style: Option<&str>) -> Option<&'static [u8]> {
    style.map(|_| b"\n".as_slice())
}

/// Translates `src` into `dst`.
///
/// * `eol` — target line-ending bytes, or `None` to leave EOLs alone;
/// * `keywords` — substitution map from [`compute_keywords`];
/// * `special` — treat the file as a symlink placeholder;
/// * `expand` — direction: `true` produces the working form, `false`
///   the normalized form;
/// * `repair` — rewrite mixed EOLs instead of failing.
///
/// # Errors
///
/// Returns [`WcError::InconsistentEol`] when the input mixes EOL styles,
/// EOL translation is requested and `repair` is off. I/O errors pass
/// through.
pub fn translate_file(
    src: &Path,
    dst: &Path,
    eol: Option<&[u8]>,
    keywords: &KeywordMap,
    special: bool,
    expand: bool,
    repair: bool,
) -> WcResult<()> {
    if src == dst {
        return Ok(());
    }
    if special {
        return translate_special(src, dst, expand);
    }
    if eol.is_none() && keywords.is_empty() {
        // No expansion: plain byte copy. Written fresh rather than
        // fs::copy so a read-only source (a pristine base) does not
        // leave its mode on the destination.
        let data = fs::read(src)?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst)?;
        }
        fs::write(dst, data)?;
        return Ok(());
    }
    let input = fs::read(src)?;
    let output = translate_bytes(&input, eol, keywords, repair)
        .map_err(|_| WcError::InconsistentEol {
            path: src.display().to_string(),
        })?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    fs::write(dst, output)?;
    Ok(())
}

/// Translates a byte buffer. See [`translate_file`].
///
/// # Errors
///
/// Returns [`WcError::InconsistentEol`] (with an empty path, filled in
/// by file-level callers) for mixed EOLs under strict repair.
pub fn translate_bytes(
    input: &[u8],
    eol: Option<&[u8]>,
    keywords: &KeywordMap,
    repair: bool,
) -> WcResult<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut seen_eol: Option<&[u8]> = None;
    let mut i = 0;
    while i < input.len() {
        let byte = input[i];
        if byte == b'\r' || byte == b'\n' {
            let token: &[u8] = if byte == b'\r' && input.get(i + 1) == Some(&b'\n') {
                b"\r\n"
            } else if byte == b'\r' {
                b"\r"
            } else {
                b"\n"
            };
            i += token.len();
            match eol {
                Some(eol) => {
                    if let Some(first) = seen_eol {
                        if first != token && !repair {
                            return Err(WcError::InconsistentEol {
                                path: String::new(),
                            });
                        }
                    } else {
                        seen_eol = Some(token);
                    }
                    out.extend_from_slice(eol);
                }
                None => out.extend_from_slice(token),
            }
        } else if byte == b'$' && !keywords.is_empty() {
            match find_keyword_segment(&input[i..]) {
                Some(segment) if translate_keyword(&mut out, segment, keywords) => {
                    i += segment.len();
                }
                _ => {
                    out.push(b'$');
                    i += 1;
                }
            }
        } else {
            out.push(byte);
            i += 1;
        }
    }
    Ok(out)
}

/// Finds a candidate `$...$` segment starting at `input[0] == b'$'`.
///
/// The closing `$` must appear within the lookahead window and no EOL
/// may intervene.
fn find_keyword_segment(input: &[u8]) -> Option<&[u8]> {
    let window = input.len().min(KEYWORD_LOOKAHEAD + 1);
    for (i, &byte) in input.iter().enumerate().take(window).skip(1) {
        match byte {
            b'$' => return Some(&input[..=i]),
            b'\r' | b'\n' => return None,
            _ => {}
        }
    }
    None
}

/// Rewrites one recognized keyword segment into `out`.
///
/// `segment` includes both dollar signs. Returns `false` (and writes
/// nothing) when the segment is not a known keyword, so the caller can
/// emit the leading `$` and rescan.
fn translate_keyword(out: &mut Vec<u8>, segment: &[u8], keywords: &KeywordMap) -> bool {
    let inner = &segment[1..segment.len() - 1];
    let name_end = inner
        .iter()
        .position(|&b| b == b':')
        .unwrap_or(inner.len());
    let Ok(name) = std::str::from_utf8(&inner[..name_end]) else {
        return false;
    };
    let Some(value) = keywords.get(name) else {
        return false;
    };
    let rest = &inner[name_end..];

    if rest.is_empty() {
        // $Name$
        match value {
            Some(value) => write_expanded(out, name, value),
            None => write_contracted(out, name),
        }
        return true;
    }
    if rest.starts_with(b"::") {
        // $Name:: fixed-width field $
        if rest.len() < 4 || rest[2] != b' ' {
            return false;
        }
        let marker = rest[rest.len() - 1];
        if marker != b' ' && marker != b'#' {
            return false;
        }
        let width = rest.len() - 4;
        write_fixed(out, name, value.as_deref(), width);
        return true;
    }
    if rest.starts_with(b": ") || rest == b":" {
        // $Name: value $
        match value {
            Some(value) => write_expanded(out, name, value),
            None => write_contracted(out, name),
        }
        return true;
    }
    false
}

fn write_contracted(out: &mut Vec<u8>, name: &str) {
    out.push(b'$');
    out.extend_from_slice(name.as_bytes());
    out.push(b'$');
}

fn write_expanded(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    let value = &value[..value.len().min(KEYWORD_MAX_LEN)];
    out.push(b'$');
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b" $");
}

/// Fixed-width form: the field keeps its width; an overflowing value is
/// truncated and flagged with `#` in the marker column.
fn write_fixed(out: &mut Vec<u8>, name: &str, value: Option<&[u8]>, width: usize) {
    out.push(b'$');
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b":: ");
    let value = value.unwrap_or(b"");
    let value = &value[..value.len().min(KEYWORD_MAX_LEN)];
    let truncated = value.len() > width;
    let take = value.len().min(width);
    out.extend_from_slice(&value[..take]);
    for _ in take..width {
        out.push(b' ');
    }
    out.push(if truncated { b'#' } else { b' ' });
    out.push(b'$');
}

#[cfg(unix)]
fn translate_special(src: &Path, dst: &Path, expand: bool) -> WcResult<()> {
    if dst.exists() || fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    if expand {
        // Normalized "link TARGET" becomes a symlink.
        let data = fs::read(src)?;
        let target = data.strip_prefix(LINK_PREFIX).ok_or_else(|| {
            WcError::corrupt(format!(
                "special file '{}' has no link prefix",
                src.display()
            ))
        })?;
        let target = std::str::from_utf8(target)
            .map_err(|_| WcError::corrupt("special file target is not UTF-8"))?
            .trim_end_matches('\n');
        std::os::unix::fs::symlink(target, dst)?;
    } else {
        // A symlink detranslates to its "link TARGET" placeholder.
        let target = fs::read_link(src)?;
        let mut data = LINK_PREFIX.to_vec();
        data.extend_from_slice(target.to_string_lossy().as_bytes());
        fs::write(dst, data)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn translate_special(src: &Path, dst: &Path, _expand: bool) -> WcResult<()> {
    // No symlinks: carry the placeholder bytes verbatim.
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_keywords() -> KeywordMap {
        KeywordMap::new()
    }

    fn rev_keywords() -> KeywordMap {
        let values = KeywordValues {
            name: "foo.txt",
            revision: Some("12"),
            author: Some("alice"),
            ..KeywordValues::default()
        };
        compute_keywords("Rev Author", &values, true)
    }

    #[test]
    fn eol_styles_resolve() {
        assert_eq!(eol_for_style("LF", b"\n"), Some(b"\n".as_slice()));
        assert_eq!(eol_for_style("CRLF", b"\n"), Some(b"\r\n".as_slice()));
        assert_eq!(eol_for_style("native", b"\r\n"), Some(b"\r\n".as_slice()));
        assert_eq!(eol_for_style("weird", b"\n"), None);
    }

    #[test]
    fn normalizes_crlf_to_lf() {
        let out = translate_bytes(b"a\r\nb\r\n", Some(b"\n"), &no_keywords(), false).unwrap();
        assert_eq!(out, b"a\nb\n");
    }

    #[test]
    fn mixed_eols_fail_strict() {
        let err = translate_bytes(b"a\r\nb\nc\r\n", Some(b"\n"), &no_keywords(), false);
        assert!(matches!(err, Err(WcError::InconsistentEol { .. })));
    }

    #[test]
    fn mixed_eols_repair_when_forced() {
        let out = translate_bytes(b"a\r\nb\nc\r", Some(b"\n"), &no_keywords(), true).unwrap();
        assert_eq!(out, b"a\nb\nc\n");
    }

    #[test]
    fn no_eol_translation_leaves_terminators() {
        let out = translate_bytes(b"a\r\nb\n", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"a\r\nb\n");
    }

    #[test]
    fn expands_bare_keyword() {
        let out = translate_bytes(b"x $Rev$ y", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"x $Rev: 12 $ y");
    }

    #[test]
    fn reexpands_valued_keyword() {
        let out = translate_bytes(b"$Rev: 11 $", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"$Rev: 12 $");
    }

    #[test]
    fn contracts_to_bare_form() {
        let values = KeywordValues::default();
        let map = compute_keywords("Rev", &values, false);
        let out = translate_bytes(b"$Rev: 12 $ and $Rev$", None, &map, false).unwrap();
        assert_eq!(out, b"$Rev$ and $Rev$");
    }

    #[test]
    fn unknown_keyword_passes_through() {
        let out = translate_bytes(b"$Bogus: 1 $", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"$Bogus: 1 $");
    }

    #[test]
    fn dollar_without_close_passes_through() {
        let out = translate_bytes(b"price is $5", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"price is $5");
    }

    #[test]
    fn eol_inside_candidate_stops_the_match() {
        let out = translate_bytes(b"$Rev\nmore$", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"$Rev\nmore$");
    }

    #[test]
    fn fixed_width_pads_with_spaces() {
        let out = translate_bytes(b"$Rev::       $", None, &rev_keywords(), false).unwrap();
        assert_eq!(out, b"$Rev:: 12    $");
    }

    #[test]
    fn fixed_width_truncates_with_marker() {
        let values = KeywordValues {
            name: "f",
            author: Some("someverylongname"),
            ..KeywordValues::default()
        };
        let map = compute_keywords("Author", &values, true);
        let out = translate_bytes(b"$Author:: name $", None, &map, false).unwrap();
        assert_eq!(out, b"$Author:: some#$");
    }

    #[test]
    fn long_values_are_silently_truncated() {
        let long = "x".repeat(KEYWORD_MAX_LEN + 40);
        let values = KeywordValues {
            name: "f",
            author: Some(&long),
            ..KeywordValues::default()
        };
        let map = compute_keywords("Author", &values, true);
        let out = translate_bytes(b"$Author$", None, &map, false).unwrap();
        let expected_len = "$Author: ".len() + KEYWORD_MAX_LEN + " $".len();
        assert_eq!(out.len(), expected_len);
    }

    #[cfg(unix)]
    #[test]
    fn special_files_roundtrip_through_symlinks() {
        use tempfile::tempdir;
        let dir = tempdir().unwrap();
        let normalized = dir.path().join("base");
        let link = dir.path().join("link");
        let back = dir.path().join("back");

        fs::write(&normalized, b"link target-file").unwrap();
        translate_file(&normalized, &link, None, &no_keywords(), true, true, false).unwrap();
        assert_eq!(fs::read_link(&link).unwrap().to_str(), Some("target-file"));

        translate_file(&link, &back, None, &no_keywords(), true, false, false).unwrap();
        assert_eq!(fs::read(&back).unwrap(), b"link target-file");
    }

    #[test]
    fn fast_path_copies_bytes() {
        use tempfile::tempdir;
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"mixed\r\nand\nraw\r").unwrap();
        translate_file(&src, &dst, None, &no_keywords(), false, true, false).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"mixed\r\nand\nraw\r");
    }
}

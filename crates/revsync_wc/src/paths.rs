//! Relative-path helpers.
//!
//! Working-copy paths are `/`-separated strings relative to the
//! operation root; the empty string names the root itself.

/// Splits a path into its parent and final segment.
///
/// `"a/b/c"` → `("a/b", "c")`; `"c"` → `("", "c")`.
#[must_use]
pub fn split(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Joins two relative paths, treating the empty string as the root.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// True when `path` equals `ancestor` or lies underneath it.
#[must_use]
pub fn is_under(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

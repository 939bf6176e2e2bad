//! Keyword computation.
//!
//! The keyword property is a whitespace-separated list of names the user
//! wants expanded in working files (`Rev`, `Author`, `Date`, `URL`, `Id`
//! and their long aliases). Expansion substitutes live values from the
//! tracking entry; contraction strips values back to the bare `$Name$`
//! form for storage as the normalized base.

use std::collections::BTreeMap;

/// Keyword name → expansion value.
///
/// `None` means "contract to the bare form"; an absent name means "not a
/// keyword, pass through unchanged".
pub type KeywordMap = BTreeMap<String, Option<Vec<u8>>>;

/// Maximum bytes of a substituted value. Longer values are silently
/// truncated; this is load-bearing wire compatibility, do not "fix" it.
pub const KEYWORD_MAX_LEN: usize = 250;

/// Live values keywords expand to.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordValues<'a> {
    /// File name, used by `Id`.
    pub name: &'a str,
    /// Repository URL of the file.
    pub url: Option<&'a str>,
    /// Last committed revision, already formatted.
    pub revision: Option<&'a str>,
    /// Last commit author.
    pub author: Option<&'a str>,
    /// Last commit date, already formatted.
    pub date: Option<&'a str>,
}

/// Builds the substitution map for a keyword list.
///
/// Each token keeps its user-typed spelling as the map key; aliases of
/// the same keyword share a value. Unknown tokens are ignored so they
/// pass through files untouched. With `expand = false` every recognized
/// token maps to `None` (contraction).
#[must_use]
pub fn compute_keywords(list: &str, values: &KeywordValues<'_>, expand: bool) -> KeywordMap {
    let mut map = KeywordMap::new();
    for token in list.split_whitespace() {
        let value = match token {
            "LastChangedDate" | "Date" => values.date.map(str::to_string),
            "LastChangedRevision" | "Revision" | "Rev" => values.revision.map(str::to_string),
            "LastChangedBy" | "Author" => values.author.map(str::to_string),
            "HeadURL" | "URL" => values.url.map(str::to_string),
            "Id" => Some(format!(
                "{} {} {} {}",
                values.name,
                values.revision.unwrap_or(""),
                values.date.unwrap_or(""),
                values.author.unwrap_or("")
            )),
            _ => continue,
        };
        let entry = if expand {
            Some(value.unwrap_or_default().into_bytes())
        } else {
            None
        };
        map.insert(token.to_string(), entry);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> KeywordValues<'static> {
        KeywordValues {
            name: "foo.txt",
            url: Some("http://repo/trunk/foo.txt"),
            revision: Some("12"),
            author: Some("alice"),
            date: Some("2006-03-01"),
        }
    }

    #[test]
    fn aliases_share_values() {
        let map = compute_keywords("Rev Revision LastChangedRevision", &values(), true);
        assert_eq!(map.len(), 3);
        for value in map.values() {
            assert_eq!(value.as_deref(), Some(b"12".as_slice()));
        }
    }

    #[test]
    fn unknown_tokens_are_ignored()  {
        let map = compute_keywords("Rev Bogus", &values(), true);
        assert!(map.contains_key("Rev"));
        assert!(!map.contains_key("Bogus"));
    }

    #[test]
    fn contraction_maps_to_none() {
        let map = compute_keywords("Author URL", &values(), false);
        assert_eq!(map.get("Author"), Some(&None));
        assert_eq!(map.get("URL"), Some(&None));
    }

    #[test]
    fn id_composes_fields() {
        let map = compute_keywords("Id", &values(), true);
        assert_eq!(
            map.get("Id").unwrap().as_deref(),
            Some(b"foo.txt 12 2006-03-01 alice".as_slice())
        );
    }
}

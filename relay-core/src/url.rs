//! URL tagging: put a correlation marker into a URL's query or fragment, idempotently.
//!
//! Query form: `<existing-query&>MARKER=<id>`. Fragment form: `^^^^<id>^^^^`
//! appended to, or replacing within, the existing fragment.

use url::Url;

use crate::id::CorrelationId;

/// Delimiter wrapped around the id in the fragment form.
pub const FRAGMENT_DELIMITER: &str = "^^^^";

/// Tag `url` with `marker=<id>` in its query string.
///
/// Relative URLs are resolved against `base` (the document URL) when one is
/// given. An existing marker is replaced in place; otherwise the marker is
/// appended to the query, or becomes the query. The path and a non-empty
/// fragment are preserved verbatim.
pub fn encode_query(url: &str, base: Option<&str>, marker: &str, id: &CorrelationId) -> String {
    let resolved = resolve(url, base);
    let parts = split(&resolved);
    let tag = format!("{}={}", marker, id);

    let query = match parts.query {
        Some(q) if !q.is_empty() => {
            let mut replaced = false;
            let segments: Vec<&str> = q
                .split('&')
                .filter_map(|seg| {
                    if !is_marker_segment(seg, marker) {
                        Some(seg)
                    } else if !replaced {
                        replaced = true;
                        Some(tag.as_str())
                    } else {
                        // Duplicate marker from a foreign tagger; keep one.
                        None
                    }
                })
                .collect();
            let joined = segments.join("&");
            if replaced {
                joined
            } else {
                format!("{}&{}", joined, tag)
            }
        }
        _ => tag,
    };

    assemble(parts.prefix, Some(&query), parts.fragment)
}

/// Tag `url` with `^^^^<id>^^^^` in its fragment.
///
/// Used for navigations where the query must stay untouched. Works on the raw
/// string (no resolution). An existing fragment marker is replaced; other
/// fragment content is kept and the marker appended after it.
pub fn encode_fragment(url: &str, id: &CorrelationId) -> String {
    let (before, fragment) = match url.find('#') {
        Some(i) => (&url[..i], &url[i + 1..]),
        None => (url, ""),
    };
    let wrapped = format!("{d}{id}{d}", d = FRAGMENT_DELIMITER, id = id);
    let fragment = match find_fragment_marker(fragment) {
        Some((start, end, _)) => format!("{}{}{}", &fragment[..start], wrapped, &fragment[end..]),
        None => format!("{}{}", fragment, wrapped),
    };
    format!("{}#{}", before, fragment)
}

/// Id carried by the query marker, if any.
pub fn extract_query_id(url: &str, marker: &str) -> Option<CorrelationId> {
    let query = split(url).query?;
    query
        .split('&')
        .find(|seg| is_marker_segment(seg, marker))
        .and_then(|seg| seg.split_once('='))
        .and_then(|(_, v)| CorrelationId::parse(v))
}

/// Id carried by the fragment marker, if any.
pub fn extract_fragment_id(url: &str) -> Option<CorrelationId> {
    let fragment = split(url).fragment?;
    find_fragment_marker(fragment).and_then(|(_, _, id)| CorrelationId::parse(id))
}

/// Remove the query marker, dropping the `?` if the query becomes empty.
pub fn strip_query_marker(url: &str, marker: &str) -> String {
    let parts = split(url);
    let query = parts.query.map(|q| {
        q.split('&')
            .filter(|seg| !is_marker_segment(seg, marker))
            .collect::<Vec<_>>()
            .join("&")
    });
    let query = query.as_deref().filter(|q| !q.is_empty());
    assemble(parts.prefix, query, parts.fragment)
}

/// Remove the fragment marker, dropping the `#` if the fragment becomes empty.
pub fn strip_fragment_marker(url: &str) -> String {
    let Some(i) = url.find('#') else {
        return url.to_string();
    };
    let (before, fragment) = (&url[..i], &url[i + 1..]);
    match find_fragment_marker(fragment) {
        Some((start, end, _)) => {
            let rest = format!("{}{}", &fragment[..start], &fragment[end..]);
            if rest.is_empty() {
                before.to_string()
            } else {
                format!("{}#{}", before, rest)
            }
        }
        None => url.to_string(),
    }
}

struct UrlParts<'a> {
    prefix: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

/// Split into (scheme+authority+path, query, fragment) without normalizing.
fn split(url: &str) -> UrlParts<'_> {
    let (head, fragment) = match url.find('#') {
        Some(i) => (&url[..i], Some(&url[i + 1..])),
        None => (url, None),
    };
    let (prefix, query) = match head.find('?') {
        Some(i) => (&head[..i], Some(&head[i + 1..])),
        None => (head, None),
    };
    UrlParts {
        prefix,
        query,
        fragment,
    }
}

/// Rejoin parts. An empty fragment is dropped so no bare trailing `#` survives.
fn assemble(prefix: &str, query: Option<&str>, fragment: Option<&str>) -> String {
    let mut out = String::with_capacity(prefix.len() + 64);
    out.push_str(prefix);
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    if let Some(f) = fragment.filter(|f| !f.is_empty()) {
        out.push('#');
        out.push_str(f);
    }
    out
}

fn resolve(url: &str, base: Option<&str>) -> String {
    if let Ok(u) = Url::parse(url) {
        return u.to_string();
    }
    base.and_then(|b| Url::parse(b).ok())
        .and_then(|b| b.join(url).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| url.to_string())
}

fn is_marker_segment(segment: &str, marker: &str) -> bool {
    match segment.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with('='),
        None => false,
    }
}

/// Locate `^^^^<digits>^^^^`. Returns (start, end, digits).
fn find_fragment_marker(fragment: &str) -> Option<(usize, usize, &str)> {
    let d = FRAGMENT_DELIMITER.len();
    for (start, _) in fragment.match_indices(FRAGMENT_DELIMITER) {
        let rest = &fragment[start + d..];
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 && rest[digits..].starts_with(FRAGMENT_DELIMITER) {
            return Some((start, start + d + digits + d, &rest[..digits]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: &str = "BodyRelay-RequestId";

    fn id(s: &str) -> CorrelationId {
        CorrelationId::parse(s).unwrap()
    }

    #[test]
    fn appends_to_existing_query() {
        let out = encode_query("https://api.example.com/submit?x=1", None, M, &id("42"));
        assert_eq!(out, "https://api.example.com/submit?x=1&BodyRelay-RequestId=42");
    }

    #[test]
    fn creates_query_when_absent() {
        let out = encode_query("https://example.com/a/b", None, M, &id("7"));
        assert_eq!(out, "https://example.com/a/b?BodyRelay-RequestId=7");
    }

    #[test]
    fn retagging_replaces_marker() {
        let once = encode_query("https://example.com/p?a=1#frag", None, M, &id("111"));
        let twice = encode_query(&once, None, M, &id("222"));
        assert_eq!(twice, "https://example.com/p?a=1&BodyRelay-RequestId=222#frag");
        assert_eq!(twice.matches(M).count(), 1);
        assert_eq!(extract_query_id(&twice, M), Some(id("222")));
    }

    #[test]
    fn fragment_preserved_after_query() {
        let out = encode_query("https://example.com/p#section-2", None, M, &id("5"));
        assert_eq!(out, "https://example.com/p?BodyRelay-RequestId=5#section-2");
    }

    #[test]
    fn relative_resolves_against_base() {
        let out = encode_query(
            "../api/save?draft=1",
            Some("https://example.com/app/page/index.html"),
            M,
            &id("9"),
        );
        assert_eq!(
            out,
            "https://example.com/app/api/save?draft=1&BodyRelay-RequestId=9"
        );
    }

    #[test]
    fn relative_without_base_is_tagged_raw() {
        let out = encode_query("/submit", None, M, &id("3"));
        assert_eq!(out, "/submit?BodyRelay-RequestId=3");
    }

    #[test]
    fn bare_trailing_hash_dropped() {
        let out = encode_query("https://example.com/p#", None, M, &id("4"));
        assert_eq!(out, "https://example.com/p?BodyRelay-RequestId=4");
    }

    #[test]
    fn duplicate_foreign_markers_collapse() {
        let url = "https://example.com/p?BodyRelay-RequestId=1&b=2&BodyRelay-RequestId=1";
        let out = encode_query(url, None, M, &id("8"));
        assert_eq!(out, "https://example.com/p?BodyRelay-RequestId=8&b=2");
    }

    #[test]
    fn similar_key_is_not_a_marker() {
        let url = "https://example.com/p?xBodyRelay-RequestId=1";
        let out = encode_query(url, None, M, &id("8"));
        assert_eq!(
            out,
            "https://example.com/p?xBodyRelay-RequestId=1&BodyRelay-RequestId=8"
        );
    }

    #[test]
    fn query_roundtrip_recovers_id() {
        for raw in ["https://example.com/", "https://example.com/a/b/c", "http://h:8080/x"] {
            let tagged = encode_query(raw, None, M, &id("1700000000000123"));
            assert_eq!(extract_query_id(&tagged, M), Some(id("1700000000000123")));
            assert_eq!(strip_query_marker(&tagged, M), raw);
        }
    }

    #[test]
    fn fragment_created_when_absent() {
        let out = encode_fragment("https://example.com/page", &id("12"));
        assert_eq!(out, "https://example.com/page#^^^^12^^^^");
        assert_eq!(extract_fragment_id(&out), Some(id("12")));
    }

    #[test]
    fn fragment_appended_after_existing_content() {
        let out = encode_fragment("https://example.com/page?q=1#top", &id("12"));
        assert_eq!(out, "https://example.com/page?q=1#top^^^^12^^^^");
    }

    #[test]
    fn fragment_marker_replaced_in_place() {
        let once = encode_fragment("https://example.com/page#a", &id("1"));
        let twice = encode_fragment(&format!("{}b", once), &id("2"));
        assert_eq!(twice, "https://example.com/page#a^^^^2^^^^b");
        assert_eq!(twice.matches(FRAGMENT_DELIMITER).count(), 2);
    }

    #[test]
    fn fragment_only_url_keeps_empty_prefix() {
        assert_eq!(encode_fragment("#", &id("6")), "#^^^^6^^^^");
        assert_eq!(encode_fragment("#view", &id("6")), "#view^^^^6^^^^");
        // Bare `#` splits into an empty prefix and an empty fragment, which is dropped.
        assert_eq!(encode_query("#", None, "M", &id("6")), "?M=6");
    }

    #[test]
    fn strip_fragment_marker_restores_url() {
        let tagged = encode_fragment("https://example.com/page#top", &id("77"));
        assert_eq!(strip_fragment_marker(&tagged), "https://example.com/page#top");
        let bare = encode_fragment("https://example.com/page", &id("77"));
        assert_eq!(strip_fragment_marker(&bare), "https://example.com/page");
    }

    #[test]
    fn fragment_delimiters_without_digits_ignored() {
        assert_eq!(extract_fragment_id("https://e.com/#^^^^abc^^^^"), None);
        let out = encode_fragment("https://e.com/#^^^^^^^^", &id("3"));
        assert_eq!(out, "https://e.com/#^^^^^^^^^^^^3^^^^");
    }
}

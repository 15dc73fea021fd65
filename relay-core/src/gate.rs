//! Request gate: which requests enter the hand-off path.

/// True when `url` carries a URI scheme (RFC 3986 §3.1). Windows drive paths
/// such as `c:\dir` are not URLs.
pub fn is_absolute_url(url: &str) -> bool {
    let b = url.as_bytes();
    if b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'\\' {
        return false;
    }
    let Some(colon) = url.find(':') else {
        return false;
    };
    let scheme = &url[..colon];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_http_url(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Body-less by convention.
fn is_bodyless_method(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
}

/// Decide whether a request is intercepted. Rules in order: feature off, absolute
/// non-http(s) URL (`blob:`, `data:`), GET/HEAD. Anything else is intercepted.
pub fn should_intercept(url: &str, method: &str, enabled: bool) -> bool {
    if !enabled {
        return false;
    }
    if is_absolute_url(url) && !is_http_url(url) {
        return false;
    }
    !is_bodyless_method(method)
}

/// Url/method captured at the first call point, re-checked at the second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSnapshot {
    pub url: String,
    pub method: String,
    pub intercept: bool,
}

impl GateSnapshot {
    pub fn evaluate(url: &str, method: &str, enabled: bool) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            intercept: should_intercept(url, method, enabled),
        }
    }

    /// Re-evaluate against the same url/method. `Err` carries the second decision
    /// when it disagrees with the first.
    pub fn recheck(&self, enabled: bool) -> Result<bool, bool> {
        let now = should_intercept(&self.url, &self.method, enabled);
        if now == self.intercept {
            Ok(now)
        } else {
            Err(now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_off_never_intercepts() {
        assert!(!should_intercept("https://a.com/x", "POST", false));
    }

    #[test]
    fn get_and_head_never_intercepted() {
        for url in ["https://a.com/x", "/rel", "blob:https://a.com/1", "x"] {
            for method in ["GET", "HEAD", "get", "Head"] {
                assert!(!should_intercept(url, method, true));
                assert!(!should_intercept(url, method, false));
            }
        }
    }

    #[test]
    fn non_http_absolute_urls_pass_through() {
        for url in [
            "blob:https://a.com/uuid",
            "data:text/plain,hi",
            "file:///etc/hosts",
            "ftp://a.com/f",
            "custom+scheme://x",
        ] {
            assert!(!should_intercept(url, "POST", true), "{}", url);
        }
    }

    #[test]
    fn http_and_relative_posts_intercepted() {
        assert!(should_intercept("https://a.com/x", "POST", true));
        assert!(should_intercept("HTTP://A.COM/x", "PUT", true));
        assert!(should_intercept("/api/save", "POST", true));
        assert!(should_intercept("save?x=1", "DELETE", true));
    }

    #[test]
    fn absolute_url_detection() {
        assert!(is_absolute_url("https://a.com"));
        assert!(is_absolute_url("blob:x"));
        assert!(is_absolute_url("a+b-c.d:rest"));
        assert!(!is_absolute_url("c:\\windows\\path"));
        assert!(!is_absolute_url("/path:with-colon"));
        assert!(!is_absolute_url("1abc:x"));
        assert!(!is_absolute_url("relative/path"));
    }

    #[test]
    fn snapshot_recheck_consistent() {
        let snap = GateSnapshot::evaluate("https://a.com/x", "POST", true);
        assert!(snap.intercept);
        assert_eq!(snap.recheck(true), Ok(true));
        assert_eq!(snap.recheck(false), Err(false));
        let get = GateSnapshot::evaluate("https://a.com/x", "GET", true);
        assert_eq!(get.recheck(false), Ok(false));
    }
}

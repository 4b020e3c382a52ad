use serde::Serialize;
use tracing::debug;
use url::Url;

use super::scripts::{are_confusable, has_mixed_script_label};

/// Everything the evaluator can hold against a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reason {
    #[serde(rename = "URL_PARSE_ERROR")]
    UrlParseError,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "ETLD_INVALID")]
    EtldInvalid,
    #[serde(rename = "ETLD_MISMATCH")]
    EtldMismatch,
    #[serde(rename = "HOST_MISMATCH")]
    HostMismatch,
    #[serde(rename = "PUNYCODE")]
    Punycode,
    #[serde(rename = "MIXED_SCRIPT")]
    MixedScript,
    #[serde(rename = "CONFUSABLE")]
    Confusable,
    #[serde(rename = "IFRAME")]
    Iframe,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::UrlParseError => "URL_PARSE_ERROR",
            Reason::Http => "HTTP",
            Reason::EtldInvalid => "ETLD_INVALID",
            Reason::EtldMismatch => "ETLD_MISMATCH",
            Reason::HostMismatch => "HOST_MISMATCH",
            Reason::Punycode => "PUNYCODE",
            Reason::MixedScript => "MIXED_SCRIPT",
            Reason::Confusable => "CONFUSABLE",
            Reason::Iframe => "IFRAME",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub ok: bool,
    pub reasons: Vec<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etld1: Option<String>,
}

impl Verdict {
    fn block(reasons: Vec<Reason>, etld1: Option<String>) -> Self {
        Self {
            ok: false,
            reasons,
            etld1,
        }
    }
}

/// Lowercase a hostname, dropping any port suffix and trailing dot.
pub fn sanitize_host(host: &str) -> String {
    let host = host.trim();
    let host = host.split(':').next().unwrap_or(host);
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn to_ascii_form(host: &str) -> String {
    idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_ascii_lowercase())
}

fn to_unicode_form(host: &str) -> String {
    let (unicode, _) = idna::domain_to_unicode(host);
    unicode
}

fn registrable_domain(host: &str) -> Option<String> {
    psl::domain_str(host).map(|d| d.to_string())
}

/// Full phishing evaluation of a page URL against the saved site.
///
/// `top_level` is supplied by the caller: a frame that is not the top-level
/// browsing context always fails with `IFRAME`. The host runs this for
/// every `phishingCheck` regardless of any client-side verdict.
pub fn evaluate(
    raw_url: &str,
    saved_etld1: Option<&str>,
    exact_host: Option<&str>,
    top_level: bool,
) -> Verdict {
    let mut reasons: Vec<Reason> = Vec::new();

    let url = match Url::parse(raw_url) {
        Ok(u) => u,
        Err(_) => return Verdict::block(vec![Reason::UrlParseError], None),
    };

    if url.scheme() != "https" {
        reasons.push(Reason::Http);
    }

    let host = match url.host_str() {
        Some(h) => sanitize_host(h),
        None => return Verdict::block(vec![Reason::UrlParseError], None),
    };

    let ascii_host = to_ascii_form(&host);
    let unicode_host = to_unicode_form(&ascii_host);

    let etld1 = registrable_domain(&ascii_host).or_else(|| registrable_domain(&unicode_host));
    if etld1.is_none() {
        reasons.push(Reason::EtldInvalid);
    }

    if let (Some(saved), Some(runtime)) = (saved_etld1, etld1.as_deref()) {
        if !saved.eq_ignore_ascii_case(runtime) {
            reasons.push(Reason::EtldMismatch);
        }
    }

    if let Some(expected) = exact_host {
        if sanitize_host(expected) != host {
            reasons.push(Reason::HostMismatch);
        }
    }

    if ascii_host.contains("xn--") {
        reasons.push(Reason::Punycode);
    }

    if has_mixed_script_label(&unicode_host) {
        reasons.push(Reason::MixedScript);
    }

    if let (Some(saved), Some(runtime)) = (saved_etld1, etld1.as_deref()) {
        let runtime_unicode = to_unicode_form(runtime);
        let saved_lower = saved.to_lowercase();
        if saved_lower != runtime_unicode && are_confusable(&saved_lower, &runtime_unicode) {
            reasons.push(Reason::Confusable);
        }
    }

    if !top_level {
        reasons.push(Reason::Iframe);
    }

    let ok = reasons.is_empty();
    if !ok {
        debug!(url = raw_url, ?reasons, "phishing gate blocked");
    }
    Verdict { ok, reasons, etld1 }
}

/// Cheap gate run inside credential reads and writes.
///
/// The runtime host must resolve to the saved eTLD+1; with `require_exact`
/// set, the sanitized hostname must also equal the stored exact host.
pub fn allow_autofill(
    saved_etld1: &str,
    host: &str,
    require_exact: bool,
    exact_host: Option<&str>,
) -> bool {
    let sanitized = sanitize_host(host);
    if sanitized.is_empty() {
        return false;
    }
    let ascii = to_ascii_form(&sanitized);
    let Some(runtime_etld1) = registrable_domain(&ascii) else {
        return false;
    };
    if !runtime_etld1.eq_ignore_ascii_case(saved_etld1) {
        return false;
    }
    if require_exact {
        match exact_host {
            Some(expected) => sanitize_host(expected) == sanitized,
            None => false,
        }
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason_set(v: &Verdict) -> Vec<&'static str> {
        let mut out: Vec<_> = v.reasons.iter().map(|r| r.as_str()).collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn clean_https_page_passes() {
        let v = evaluate("https://login.example.com/", Some("example.com"), None, true);
        assert!(v.ok, "reasons: {:?}", v.reasons);
        assert_eq!(v.etld1.as_deref(), Some("example.com"));
    }

    #[test]
    fn plain_http_flags() {
        let v = evaluate("http://login.example.com/", Some("example.com"), None, true);
        assert!(!v.ok);
        assert_eq!(reason_set(&v), vec!["HTTP"]);
    }

    #[test]
    fn garbage_url_is_parse_error() {
        let v = evaluate("not a url", None, None, true);
        assert!(!v.ok);
        assert_eq!(reason_set(&v), vec!["URL_PARSE_ERROR"]);
    }

    #[test]
    fn punycode_homograph_is_caught() {
        let v = evaluate(
            "https://www.xn--pple-43d.com/login",
            Some("apple.com"),
            None,
            true,
        );
        assert!(!v.ok);
        assert_eq!(v.etld1.as_deref(), Some("xn--pple-43d.com"));
        let reasons = reason_set(&v);
        assert!(reasons.contains(&"PUNYCODE"));
        assert!(reasons.contains(&"CONFUSABLE") || reasons.contains(&"MIXED_SCRIPT"));
    }

    #[test]
    fn cross_site_read_is_mismatch() {
        let v = evaluate("https://evil.example.org/", Some("example.com"), None, true);
        assert!(!v.ok);
        assert!(reason_set(&v).contains(&"ETLD_MISMATCH"));
    }

    #[test]
    fn exact_host_mismatch_flags() {
        let v = evaluate(
            "https://phish.example.com/",
            Some("example.com"),
            Some("login.example.com"),
            true,
        );
        assert!(!v.ok);
        assert_eq!(reason_set(&v), vec!["HOST_MISMATCH"]);
    }

    #[test]
    fn iframe_always_blocks() {
        let v = evaluate("https://login.example.com/", Some("example.com"), None, false);
        assert!(!v.ok);
        assert_eq!(reason_set(&v), vec!["IFRAME"]);
    }

    #[test]
    fn autofill_gate_requires_same_site() {
        assert!(allow_autofill("example.com", "login.example.com", false, None));
        assert!(allow_autofill("example.com", "LOGIN.Example.COM.", false, None));
        assert!(!allow_autofill("example.com", "evil.example.org", false, None));
        assert!(!allow_autofill("example.com", "", false, None));
    }

    #[test]
    fn autofill_gate_exact_host() {
        assert!(allow_autofill(
            "example.com",
            "login.example.com",
            true,
            Some("login.example.com")
        ));
        assert!(!allow_autofill(
            "example.com",
            "other.example.com",
            true,
            Some("login.example.com")
        ));
        assert!(!allow_autofill("example.com", "login.example.com", true, None));
    }
}

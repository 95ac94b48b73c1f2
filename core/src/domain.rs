//! Host, domain and URL helpers shared by the engine and plugins.

use regex::Regex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

const PRIVATE_SECTION: &str = "===BEGIN PRIVATE DOMAINS===";

/// ICANN section of the public suffix list.
#[derive(Debug, Clone, Default)]
pub struct PublicSuffixList {
    rules: HashSet<String>,
    wildcards: HashSet<String>,
    exceptions: HashSet<String>,
}

impl PublicSuffixList {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut psl = PublicSuffixList::default();
        for line in lines {
            let line = line.as_ref().trim();
            if line.contains(PRIVATE_SECTION) {
                break;
            }
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let Some(rule) = line.split_whitespace().next() else { continue };
            let rule = rule.to_lowercase();
            if let Some(rest) = rule.strip_prefix('!') {
                psl.exceptions.insert(rest.to_string());
            } else if let Some(rest) = rule.strip_prefix("*.") {
                psl.wildcards.insert(rest.to_string());
            } else {
                psl.rules.insert(rule);
            }
        }
        psl
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.wildcards.is_empty() && self.exceptions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len() + self.wildcards.len() + self.exceptions.len()
    }

    /// Number of trailing labels forming the public suffix.
    fn suffix_labels(&self, labels: &[&str], accept_unknown: bool) -> Option<usize> {
        let n = labels.len();
        for i in 0..n {
            let candidate = labels[i..].join(".");
            if self.exceptions.contains(&candidate) {
                return Some(n - i - 1);
            }
            if self.rules.contains(&candidate) {
                return Some(n - i);
            }
            if i + 1 < n && self.wildcards.contains(&labels[i + 1..].join(".")) {
                return Some(n - i);
            }
        }
        accept_unknown.then_some(1)
    }

    /// Public suffix plus one label, e.g. `example.co.uk` for
    /// `www.example.co.uk`. `None` when the name is itself a suffix.
    pub fn private_suffix(&self, name: &str, accept_unknown: bool) -> Option<String> {
        let name = name.trim_end_matches('.').to_lowercase();
        if name.is_empty() {
            return None;
        }
        let labels: Vec<&str> = name.split('.').collect();
        if labels.iter().any(|l| l.is_empty()) {
            return None;
        }
        let sfx = self.suffix_labels(&labels, accept_unknown)?;
        if sfx >= labels.len() {
            return None;
        }
        Some(labels[labels.len() - sfx - 1..].join("."))
    }
}

/// Registrable domain a host name belongs to.
pub fn host_domain(hostname: &str, psl: &PublicSuffixList) -> Option<String> {
    if hostname.is_empty() || psl.is_empty() {
        return None;
    }
    psl.private_suffix(hostname, true)
}

/// True when `hostname` is itself a registrable domain.
pub fn is_domain(hostname: &str, psl: &PublicSuffixList) -> bool {
    if hostname.is_empty() || psl.is_empty() {
        return false;
    }
    psl.private_suffix(hostname, false).as_deref() == Some(hostname.to_lowercase().as_str())
}

/// Plausible host name sitting on a known suffix.
pub fn valid_host(hostname: &str, psl: &PublicSuffixList) -> bool {
    static CHARS: OnceLock<Option<Regex>> = OnceLock::new();
    if hostname.is_empty() || psl.is_empty() || !hostname.contains('.') {
        return false;
    }
    let ok_chars = CHARS
        .get_or_init(|| Regex::new(r"(?i)^[a-z0-9\-.]*$").ok())
        .as_ref()
        .map(|re| re.is_match(hostname))
        .unwrap_or(false);
    ok_chars && psl.private_suffix(hostname, false).is_some()
}

/// Domain with its public suffix removed; for sub-domains the label just
/// left of the suffix. `www.example.co.uk` gives `example`.
pub fn domain_keyword(domain: &str, psl: &PublicSuffixList) -> Option<String> {
    let lower = domain.to_lowercase();
    let dom = host_domain(&lower, psl)?;
    let tld = dom.split('.').skip(1).collect::<Vec<_>>().join(".");
    let kw = lower.replace(&format!(".{tld}"), "");
    match kw.rsplit_once('.') {
        Some((_, last)) => Some(last.to_string()),
        None => Some(kw),
    }
}

pub fn domain_keywords<'a>(domains: impl IntoIterator<Item = &'a str>, psl: &PublicSuffixList) -> HashSet<String> {
    domains
        .into_iter()
        .filter_map(|d| domain_keyword(d, psl))
        .filter(|k| !k.is_empty())
        .collect()
}

/// Scheme and authority of a URL, lower-cased, without a trailing slash.
pub fn url_base_url(url: &str) -> Option<String> {
    static WITH_SCHEME: OnceLock<Option<Regex>> = OnceLock::new();
    static BARE: OnceLock<Option<Regex>> = OnceLock::new();
    if url.is_empty() {
        return None;
    }
    let re = if url.contains("://") {
        WITH_SCHEME.get_or_init(|| Regex::new(r"^(\w+://.[^/:?]*)[:/?].*").ok())
    } else {
        BARE.get_or_init(|| Regex::new(r"^(.[^/:?]*)[:/?]").ok())
    };
    let base = re
        .as_ref()
        .and_then(|re| re.captures(url))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(url);
    Some(base.to_lowercase())
}

/// Host part of a URL, lower-cased.
pub fn url_fqdn(url: &str) -> Option<String> {
    let base = url_base_url(url)?;
    let idx = if base.contains("://") { 2 } else { 0 };
    base.split('/').nth(idx).map(|s| s.to_lowercase())
}

pub fn is_valid_local_or_loopback_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psl() -> PublicSuffixList {
        PublicSuffixList::from_lines([
            "// comment",
            "com",
            "net",
            "uk",
            "co.uk",
            "*.ck",
            "!www.ck",
            "// ===BEGIN PRIVATE DOMAINS===",
            "blogspot.com",
        ])
    }

    #[test]
    fn private_suffix_rules() {
        let p = psl();
        assert_eq!(p.private_suffix("www.example.co.uk", true).as_deref(), Some("example.co.uk"));
        assert_eq!(p.private_suffix("a.b.foo.ck", true).as_deref(), Some("b.foo.ck"));
        assert_eq!(p.private_suffix("www.ck", true).as_deref(), Some("www.ck"));
        assert_eq!(p.private_suffix("co.uk", true), None);
        assert_eq!(p.private_suffix("example.invalid", false), None);
        assert_eq!(p.private_suffix("example.invalid", true).as_deref(), Some("example.invalid"));
    }

    #[test]
    fn private_section_is_ignored() {
        let p = psl();
        assert_eq!(host_domain("x.blogspot.com", &p).as_deref(), Some("blogspot.com"));
    }

    #[test]
    fn domain_checks() {
        let p = psl();
        assert!(is_domain("example.net", &p));
        assert!(!is_domain("www.example.net", &p));
        assert!(valid_host("www.example.net", &p));
        assert!(!valid_host("localhost", &p));
        assert!(!is_domain("example.net", &PublicSuffixList::default()));
    }

    #[test]
    fn keywords() {
        let p = psl();
        assert_eq!(domain_keyword("www.example.co.uk", &p).as_deref(), Some("example"));
        assert_eq!(domain_keyword("Example.NET", &p).as_deref(), Some("example"));
        let kws = domain_keywords(["example.net", "other.com"], &p);
        assert!(kws.contains("example") && kws.contains("other"));
    }

    #[test]
    fn url_parts() {
        assert_eq!(url_base_url("https://WWW.Example.net/path?q=1").as_deref(), Some("https://www.example.net"));
        assert_eq!(url_fqdn("https://www.example.net:8443/x").as_deref(), Some("www.example.net"));
        assert_eq!(url_fqdn("www.example.net/x").as_deref(), Some("www.example.net"));
        assert_eq!(url_fqdn("http://example.net").as_deref(), Some("example.net"));
        assert_eq!(url_fqdn(""), None);
    }

    #[test]
    fn local_addresses() {
        assert!(is_valid_local_or_loopback_ip("127.0.0.1"));
        assert!(is_valid_local_or_loopback_ip("10.1.2.3"));
        assert!(is_valid_local_or_loopback_ip("::1"));
        assert!(!is_valid_local_or_loopback_ip("8.8.8.8"));
        assert!(!is_valid_local_or_loopback_ip("example.net"));
    }
}

//! The surface plugins use to reach the outside world.
//!
//! Implementations live outside this crate; tests substitute fakes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::PublicSuffixList;

#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    /// Capped at the scan's `_fetchtimeout`.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub post_data: Option<String>,
    pub verify: bool,
    /// Skip the body when the server reports a larger content length.
    pub size_limit: Option<u64>,
    pub head_only: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        FetchRequest { url: url.into(), verify: true, ..Default::default() }
    }

    pub fn timeout(mut self, t: Duration) -> Self {
        self.timeout = Some(t);
        self
    }

    pub fn header(mut self, k: &str, v: &str) -> Self {
        self.headers.insert(k.to_string(), v.to_string());
        self
    }
}

/// Result of an HTTP fetch. Failures carry code `"-1"` and no content so
/// that callers can treat every outcome the same way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub code: String,
    pub status: String,
    pub content: Option<String>,
    /// Header names are lower-cased.
    pub headers: BTreeMap<String, String>,
    pub real_url: String,
}

impl FetchResponse {
    pub fn failed(url: &str, status: impl Into<String>) -> Self {
        FetchResponse {
            code: "-1".to_string(),
            status: status.into(),
            content: None,
            headers: BTreeMap::new(),
            real_url: url.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.starts_with('2')
    }
}

pub trait Services: Send + Sync {
    fn fetch(&self, req: &FetchRequest) -> FetchResponse;

    /// IPv4 addresses for a host name, deduplicated.
    fn resolve_host(&self, host: &str) -> Vec<String>;
    fn resolve_host6(&self, host: &str) -> Vec<String>;
    /// Reverse lookup. Invalid addresses yield an empty list.
    fn resolve_ip(&self, ip: &str) -> Vec<String>;

    /// Whether `host` currently resolves to `ip`.
    fn validate_ip(&self, host: &str, ip: &str) -> bool {
        let addrs = if ip.contains(':') { self.resolve_host6(host) } else { self.resolve_host(host) };
        addrs.iter().any(|a| a == ip)
    }

    /// True when random labels under `domain` resolve.
    fn check_dns_wildcard(&self, domain: &str) -> bool;

    fn cache_put(&self, key: &str, content: &str);
    fn cache_get(&self, key: &str, max_age_hours: u64) -> Option<String>;

    /// ICANN public suffix rules, fetched through the cache.
    fn public_suffix_list(&self) -> Arc<PublicSuffixList>;

    /// Map a CVE id onto an event type and a description.
    fn cve_info(&self, cve_id: &str) -> (String, String);
}

//! In-memory [`Services`] for plugin and engine tests.

use crate::domain::PublicSuffixList;
use crate::services::{FetchRequest, FetchResponse, Services};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serves canned pages and DNS answers. Unknown URLs fail with `-1`,
/// unknown names resolve to nothing.
#[derive(Default)]
pub struct FakeServices {
    pub pages: Mutex<BTreeMap<String, FetchResponse>>,
    pub hosts: Mutex<BTreeMap<String, Vec<String>>>,
    pub hosts6: Mutex<BTreeMap<String, Vec<String>>>,
    pub reverse: Mutex<BTreeMap<String, Vec<String>>>,
    pub wildcards: Mutex<Vec<String>>,
    pub cache: Mutex<BTreeMap<String, String>>,
    pub fetched: Mutex<Vec<String>>,
    psl: Arc<PublicSuffixList>,
}

impl FakeServices {
    /// Knows the `com`, `net`, `org` and `co.uk` suffixes.
    pub fn new() -> Self {
        Self::with_suffixes(&["com", "net", "org", "uk", "co.uk"])
    }

    pub fn with_suffixes(rules: &[&str]) -> Self {
        FakeServices { psl: Arc::new(PublicSuffixList::from_lines(rules)), ..Default::default() }
    }

    pub fn page(&self, url: &str, code: &str, body: &str, headers: &[(&str, &str)]) -> &Self {
        self.pages.lock().insert(
            url.to_string(),
            FetchResponse {
                code: code.to_string(),
                status: "OK".to_string(),
                content: Some(body.to_string()),
                headers: headers.iter().map(|(k, v)| (k.to_lowercase(), v.to_string())).collect(),
                real_url: url.to_string(),
            },
        );
        self
    }

    pub fn host(&self, name: &str, addrs: &[&str]) -> &Self {
        let (v6, v4): (Vec<String>, Vec<String>) = addrs.iter().map(|a| a.to_string()).partition(|a| a.contains(':'));
        if !v4.is_empty() {
            self.hosts.lock().insert(name.to_string(), v4);
        }
        if !v6.is_empty() {
            self.hosts6.lock().insert(name.to_string(), v6);
        }
        self
    }

    pub fn ptr(&self, ip: &str, names: &[&str]) -> &Self {
        self.reverse.lock().insert(ip.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn wildcard(&self, domain: &str) -> &Self {
        self.wildcards.lock().push(domain.to_string());
        self
    }

    /// URLs requested so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

impl Services for FakeServices {
    fn fetch(&self, req: &FetchRequest) -> FetchResponse {
        self.fetched.lock().push(req.url.clone());
        self.pages
            .lock()
            .get(&req.url)
            .cloned()
            .unwrap_or_else(|| FetchResponse::failed(&req.url, "no route"))
    }

    fn resolve_host(&self, host: &str) -> Vec<String> {
        self.hosts.lock().get(host).cloned().unwrap_or_default()
    }

    fn resolve_host6(&self, host: &str) -> Vec<String> {
        self.hosts6.lock().get(host).cloned().unwrap_or_default()
    }

    fn resolve_ip(&self, ip: &str) -> Vec<String> {
        self.reverse.lock().get(ip).cloned().unwrap_or_default()
    }

    fn check_dns_wildcard(&self, domain: &str) -> bool {
        self.wildcards.lock().iter().any(|d| d == domain)
    }

    fn cache_put(&self, key: &str, content: &str) {
        self.cache.lock().insert(key.to_string(), content.to_string());
    }

    fn cache_get(&self, key: &str, _max_age_hours: u64) -> Option<String> {
        self.cache.lock().get(key).cloned()
    }

    fn public_suffix_list(&self) -> Arc<PublicSuffixList> {
        self.psl.clone()
    }

    fn cve_info(&self, cve_id: &str) -> (String, String) {
        ("VULNERABILITY_GENERAL".to_string(), format!("{cve_id}\n<SFURL>https://nvd.nist.gov/vuln/detail/{cve_id}</SFURL>"))
    }
}

/// Records every event a plugin emits.
#[derive(Default)]
pub struct CollectingSink {
    pub events: Mutex<Vec<crate::Event>>,
}

impl CollectingSink {
    /// `(type, data)` pairs in emission order.
    pub fn emitted(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.event_type().to_string(), e.data().to_string()))
            .collect()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .map(|e| e.data().to_string())
            .collect()
    }
}

impl crate::EventSink for CollectingSink {
    fn notify(&self, event: crate::Event, output_filter: &[String]) {
        if output_filter.is_empty() || output_filter.iter().any(|t| t == event.event_type()) {
            self.events.lock().push(event);
        }
    }
}

/// A context wired to `sink` and `services`, for driving one plugin
/// outside the engine.
pub fn plugin_context(
    name: &str,
    target: crate::Target,
    services: Arc<FakeServices>,
    sink: Arc<CollectingSink>,
) -> crate::PluginContext {
    crate::PluginContext::new(
        name,
        "TESTSCAN",
        Arc::new(parking_lot::RwLock::new(target)),
        services,
        sink,
        Arc::new(crate::scanlog::NullLog),
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
    )
}

/// ROOT for `seed` and a child event of `event_type` carrying `data`.
pub fn seeded_event(seed: &str, event_type: &str, data: &str) -> Arc<crate::Event> {
    let root = match crate::Event::root(seed) {
        Ok(r) => Arc::new(r),
        Err(e) => panic!("bad seed {seed}: {e}"),
    };
    match crate::Event::new(event_type, data, "sfp_test", &root) {
        Ok(e) => Arc::new(e),
        Err(e) => panic!("bad event {event_type}: {e}"),
    }
}

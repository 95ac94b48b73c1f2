//! Production implementation of the services plugins call: HTTP, DNS, the
//! disk cache, the public suffix list and CVE lookups.

mod cache;
mod cve;
mod dns;
mod http;
pub mod proxy;

pub use cache::DiskCache;
pub use cve::rating as cve_rating;
pub use proxy::{ProxyConfig, ProxyKind};
pub use spiderfoot_core::domain::*;

use spiderfoot_core::{FetchRequest, FetchResponse, GlobalConfig, Services};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;

/// Cache key of the public suffix list.
pub const TLD_CACHE_KEY: &str = "internet_tlds";

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("configuration: {0}")]
    Config(String),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking facade over an owned tokio runtime. Plugins run on plain
/// threads, so each call drives its future to completion with `block_on`.
pub struct SfServices {
    rt: Runtime,
    http: http::Http,
    dns: dns::Dns,
    cache: DiskCache,
    tlds_url: String,
    tlds_cache_hours: u64,
    user_agent: String,
    psl: OnceLock<Arc<PublicSuffixList>>,
}

impl SfServices {
    pub fn new(cfg: &GlobalConfig) -> Result<Self, ServicesError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sf-services")
            .enable_all()
            .build()?;
        let proxy = ProxyConfig::from_config(cfg)?;
        if let Some(p) = &proxy {
            tracing::info!(proxy = %p.host, port = p.port, "outbound requests use a proxy");
        }
        let (http, dns) = {
            let _guard = rt.enter();
            let http = http::Http::new(
                proxy,
                &cfg.user_agent,
                Duration::from_secs(cfg.fetch_timeout.max(1)),
                cfg.fetch_qps,
            )?;
            (http, dns::Dns::new(&cfg.dns_server)?)
        };
        Ok(SfServices {
            rt,
            http,
            dns,
            cache: DiskCache::new(&cfg.cache_dir),
            tlds_url: cfg.internet_tlds.clone(),
            tlds_cache_hours: cfg.internet_tlds_cache,
            user_agent: cfg.user_agent.clone(),
            psl: OnceLock::new(),
        })
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    fn load_public_suffix_list(&self) -> PublicSuffixList {
        let body = match self.cache.get(TLD_CACHE_KEY, self.tlds_cache_hours) {
            Some(b) => b,
            None => {
                let req = FetchRequest { user_agent: Some(self.user_agent.clone()), ..FetchRequest::get(&self.tlds_url) };
                let resp = self.fetch(&req);
                match resp.content {
                    Some(c) if resp.is_ok() && !c.is_empty() => {
                        self.cache.put(TLD_CACHE_KEY, &c);
                        c
                    }
                    _ => {
                        tracing::error!(url = %self.tlds_url, code = %resp.code, "unable to fetch the public suffix list");
                        return PublicSuffixList::default();
                    }
                }
            }
        };
        PublicSuffixList::from_lines(body.lines())
    }
}

impl Services for SfServices {
    fn fetch(&self, req: &FetchRequest) -> FetchResponse {
        self.rt.block_on(self.http.fetch(req))
    }

    fn resolve_host(&self, host: &str) -> Vec<String> {
        self.rt.block_on(self.dns.resolve_host(host))
    }

    fn resolve_host6(&self, host: &str) -> Vec<String> {
        self.rt.block_on(self.dns.resolve_host6(host))
    }

    fn resolve_ip(&self, ip: &str) -> Vec<String> {
        self.rt.block_on(self.dns.resolve_ip(ip))
    }

    fn check_dns_wildcard(&self, domain: &str) -> bool {
        self.rt.block_on(self.dns.check_wildcard(domain))
    }

    fn cache_put(&self, key: &str, content: &str) {
        self.cache.put(key, content)
    }

    fn cache_get(&self, key: &str, max_age_hours: u64) -> Option<String> {
        self.cache.get(key, max_age_hours)
    }

    /// Empty when the list could not be fetched; the caller decides whether
    /// that is fatal.
    fn public_suffix_list(&self) -> Arc<PublicSuffixList> {
        self.psl.get_or_init(|| Arc::new(self.load_public_suffix_list())).clone()
    }

    fn cve_info(&self, cve_id: &str) -> (String, String) {
        for source in cve::SOURCES {
            let key = format!("{source}-{cve_id}");
            let body = match self.cache.get(&key, cve::CACHE_HOURS) {
                Some(b) => b,
                None => {
                    let req = FetchRequest::get(cve::source_url(source, cve_id)).timeout(Duration::from_secs(5));
                    match self.fetch(&req).content {
                        Some(c) if !c.is_empty() => {
                            self.cache.put(&key, &c);
                            c
                        }
                        _ => continue,
                    }
                }
            };
            if let Some((score, descr)) = cve::parse(source, &body) {
                return cve::describe(cve_id, score, &descr);
            }
        }
        cve::unknown(cve_id)
    }
}

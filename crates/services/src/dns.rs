use crate::ServicesError;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::Rng;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const WILDCARD_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxyz3456789";

pub(crate) struct Dns {
    resolver: TokioAsyncResolver,
}

impl Dns {
    /// Use `server` when non-empty, otherwise the system configuration.
    pub(crate) fn new(server: &str) -> Result<Self, ServicesError> {
        let server = server.trim();
        let resolver = if server.is_empty() {
            TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
                tracing::warn!("system resolver configuration unavailable ({e}); using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            })
        } else {
            let ip: IpAddr = server
                .parse()
                .map_err(|_| ServicesError::Config(format!("invalid DNS server: {server}")))?;
            let group = NameServerConfigGroup::from_ips_clear(&[ip], 53, true);
            TokioAsyncResolver::tokio(ResolverConfig::from_parts(None, vec![], group), ResolverOpts::default())
        };
        Ok(Dns { resolver })
    }

    pub(crate) async fn resolve_host(&self, host: &str) -> Vec<String> {
        if host.parse::<Ipv4Addr>().is_ok() {
            return vec![host.to_string()];
        }
        match self.resolver.ipv4_lookup(host).await {
            Ok(l) => dedup(l.iter().map(|a| a.to_string())),
            Err(e) => {
                tracing::debug!(host, "A lookup failed: {e}");
                Vec::new()
            }
        }
    }

    pub(crate) async fn resolve_host6(&self, host: &str) -> Vec<String> {
        if host.parse::<Ipv6Addr>().is_ok() {
            return vec![host.to_string()];
        }
        match self.resolver.ipv6_lookup(host).await {
            Ok(l) => dedup(l.iter().map(|a| a.to_string())),
            Err(e) => {
                tracing::debug!(host, "AAAA lookup failed: {e}");
                Vec::new()
            }
        }
    }

    pub(crate) async fn resolve_ip(&self, ip: &str) -> Vec<String> {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return Vec::new();
        };
        match self.resolver.reverse_lookup(addr).await {
            Ok(l) => dedup(l.iter().map(|n| n.to_string().trim_end_matches('.').to_lowercase())),
            Err(e) => {
                tracing::debug!(ip, "PTR lookup failed: {e}");
                Vec::new()
            }
        }
    }

    pub(crate) async fn check_wildcard(&self, domain: &str) -> bool {
        let probe = format!("{}.{}", random_label(10), domain);
        !self.resolve_host(&probe).await.is_empty()
    }
}

/// Sorted, deduplicated.
fn dedup(it: impl Iterator<Item = String>) -> Vec<String> {
    it.collect::<BTreeSet<_>>().into_iter().collect()
}

pub(crate) fn random_label(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| WILDCARD_ALPHABET[rng.gen_range(0..WILDCARD_ALPHABET.len())] as char)
        .collect()
}

//! Host and address resolution: names to IPs, IPs to names, owned
//! netblocks to reverse names, plus host names pulled out of raw content.

use ipnet::{IpNet, Ipv4Net};
use percent_encoding::percent_decode_str;
use regex::Regex;
use spiderfoot_core::domain::{host_domain, is_domain};
use spiderfoot_core::plugin::{merge_opts, str_list};
use spiderfoot_core::{
    Event, OptMap, OptMapExt, Plugin, PluginContext, PluginError, PluginMeta, PluginRegistry, Services, Target,
    TargetType,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, OnceLock};

pub const NAME: &str = "sfp_dnsresolve";

/// Events that name a host, address or netblock directly.
const RESOLVABLE: &[&str] = &[
    "CO_HOSTED_SITE",
    "AFFILIATE_INTERNET_NAME",
    "NETBLOCK_OWNER",
    "IP_ADDRESS",
    "IPV6_ADDRESS",
    "INTERNET_NAME",
    "AFFILIATE_IPADDR",
];

/// Events whose content may mention host names under the target.
const CONTENT: &[&str] = &[
    "TARGET_WEB_CONTENT",
    "BASE64_DATA",
    "AFFILIATE_DOMAIN_WHOIS",
    "CO_HOSTED_SITE_DOMAIN_WHOIS",
    "DOMAIN_WHOIS",
    "NETBLOCK_WHOIS",
    "LEAKSITE_CONTENT",
    "RAW_DNS_RECORDS",
    "RAW_FILE_META_DATA",
    "RAW_RIR_DATA",
    "SEARCH_ENGINE_WEB_CONTENT",
    "SIMILARDOMAIN_WHOIS",
    "SSL_CERTIFICATE_RAW",
    "SSL_CERTIFICATE_ISSUED",
    "TCP_PORT_OPEN_BANNER",
    "WEBSERVER_BANNER",
    "WEBSERVER_HTTPHEADERS",
];

/// How far before each mention of a target name to look for a host.
const LOOKBEHIND: usize = 100;

fn is_ipv4(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

fn is_ipv6(s: &str) -> bool {
    s.parse::<Ipv6Addr>().is_ok()
}

fn alias_type(host: &str) -> &'static str {
    if is_ipv4(host) {
        "IP_ADDRESS"
    } else if is_ipv6(host) {
        "IPV6_ADDRESS"
    } else {
        "INTERNET_NAME"
    }
}

/// Addresses of an owned IPv4 netblock worth a reverse lookup. Network,
/// broadcast and any address with a 255 octet are left out.
pub fn netblock_hosts(net: &Ipv4Net) -> Vec<Ipv4Addr> {
    net.hosts()
        .filter(|ip| {
            let o = ip.octets();
            o[3] != 0 && !o.contains(&255)
        })
        .collect()
}

/// Host names ending in `.name` that appear in `data`. Both are expected
/// lower-cased.
pub fn hostnames_near(data: &str, name: &str) -> Vec<String> {
    let Ok(re) = Regex::new(&format!(r"[^a-z0-9\-\.]([a-z0-9\-\.]*\.{})", regex::escape(name))) else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    let mut from = 0;
    while let Some(pos) = data[from..].find(name) {
        let offset = from + pos;
        from = offset + name.len();
        if offset == 0 {
            continue;
        }
        let mut start = offset.saturating_sub(LOOKBEHIND);
        while !data.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = (offset + name.len() + 1).min(data.len());
        while !data.is_char_boundary(end) {
            end += 1;
        }
        for caps in re.captures_iter(&data[start..end]) {
            let m = &caps[1];
            // Wildcard certificates come through as ".example.net".
            let host = m.strip_prefix('.').unwrap_or(m);
            if !out.iter().any(|h| h == host) {
                out.push(host.to_string());
            }
        }
    }
    out
}

/// Percent-decoded, lower-cased content. RIR data often carries escaped
/// line breaks that would otherwise glue host names together.
fn normalize_content(event_type: &str, data: &str) -> String {
    static ESCAPES: OnceLock<Option<Regex>> = OnceLock::new();
    let decoded = percent_decode_str(data).decode_utf8_lossy().to_lowercase();
    if event_type != "RAW_RIR_DATA" {
        return decoded;
    }
    match ESCAPES.get_or_init(|| Regex::new(r"(\\x[0-9a-f]{2}|\\n|\\r)").ok()) {
        Some(re) => re.replace_all(&decoded, "\n").into_owned(),
        None => decoded,
    }
}

/// Names and addresses equivalent to the target.
pub fn resolve_targets(services: &dyn Services, target: &Target, validate_reverse: bool) -> Vec<String> {
    let mut out = Vec::new();
    let reverse = |ip: &str, out: &mut Vec<String>| {
        for name in services.resolve_ip(ip) {
            if !validate_reverse || services.validate_ip(&name, ip) {
                out.push(name);
            }
        }
    };
    let value = target.value();
    match target.target_type() {
        TargetType::InternetName => {
            out.push(value.to_string());
            out.extend(services.resolve_host(value));
            out.extend(services.resolve_host6(value));
        }
        TargetType::IpAddress | TargetType::Ipv6Address => {
            out.push(value.to_string());
            reverse(value, &mut out);
        }
        TargetType::NetblockOwner | TargetType::Netblockv6Owner => {
            if let Ok(net) = value.parse::<IpNet>() {
                // Only small blocks; larger ones are walked by the event handler.
                if net.max_prefix_len() - net.prefix_len() <= 8 {
                    let hosts: Vec<IpAddr> = if net.prefix_len() == net.max_prefix_len() {
                        vec![net.addr()]
                    } else {
                        net.hosts().collect()
                    };
                    for ip in hosts {
                        let ip = ip.to_string();
                        reverse(&ip, &mut out);
                        out.push(ip);
                    }
                }
            }
        }
        _ => {}
    }
    let mut seen = HashSet::new();
    out.retain(|h| seen.insert(h.to_lowercase()));
    out
}

#[derive(Default)]
pub struct SfpDnsResolve {
    ctx: Option<PluginContext>,
    opts: OptMap,
    seen_data: HashSet<String>,
    /// Parent data each host has already been reported under.
    host_parents: HashMap<String, HashSet<String>>,
    domains: HashSet<String>,
}

impl SfpDnsResolve {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::<SfpDnsResolve>::default()
    }

    fn context(&self) -> Result<PluginContext, PluginError> {
        self.ctx.clone().ok_or_else(|| PluginError::Internal("not set up".into()))
    }

    /// False when `host` was already reported under `parent`.
    fn first_sighting(&mut self, host: &str, parent: &Event) -> bool {
        let parents = self.host_parents.entry(host.to_string()).or_default();
        if !parents.is_empty() && (parents.contains(parent.data()) || parent.data() == host) {
            return false;
        }
        parents.insert(parent.data().to_string());
        true
    }

    fn emit(ctx: &PluginContext, event_type: &str, data: &str, parent: &Arc<Event>) -> Result<Arc<Event>, PluginError> {
        let evt = Event::new(event_type, data, NAME, parent)?;
        ctx.notify_listeners(evt.clone());
        Ok(Arc::new(evt))
    }

    fn process_host(
        &mut self,
        ctx: &PluginContext,
        host: &str,
        parent: &Arc<Event>,
        affiliate: bool,
    ) -> Result<(), PluginError> {
        if !self.first_sighting(host, parent) {
            ctx.debug(&format!("Skipping host, {host}, already processed."));
            return Ok(());
        }
        ctx.debug(&format!("Found host: {host}"));

        let htype = match (affiliate, alias_type(host)) {
            (true, "IP_ADDRESS") => "AFFILIATE_IPADDR",
            (true, "IPV6_ADDRESS") => {
                ctx.debug(&format!("Not reporting IPv6 affiliate {host}"));
                return Ok(());
            }
            (true, _) => "AFFILIATE_INTERNET_NAME",
            (false, t) => t,
        };

        let services = ctx.services();
        if htype.ends_with("INTERNET_NAME") {
            let resolves = !services.resolve_host(host).is_empty() || !services.resolve_host6(host).is_empty();
            if !resolves {
                if htype == "INTERNET_NAME" {
                    Self::emit(ctx, "INTERNET_NAME_UNRESOLVED", host, parent)?;
                }
                return Ok(());
            }
        }

        let evt = if host != parent.data() { Self::emit(ctx, htype, host, parent)? } else { parent.clone() };

        let psl = services.public_suffix_list();
        match htype {
            "INTERNET_NAME" => {
                let Some(dom) = host_domain(host, &psl) else { return Ok(()) };
                self.process_domain(ctx, &dom, &evt, false)?;
                for ip6 in services.resolve_host6(host) {
                    if !self.first_sighting(&ip6, &evt) {
                        ctx.debug(&format!("Skipping host, {ip6}, already processed."));
                        continue;
                    }
                    Self::emit(ctx, "IPV6_ADDRESS", &ip6, &evt)?;
                }
            }
            "AFFILIATE_INTERNET_NAME" => {
                let Some(dom) = host_domain(host, &psl) else { return Ok(()) };
                if dom == host && !is_domain(&dom, &psl) {
                    return Ok(());
                }
                self.process_domain(ctx, &dom, &evt, true)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn process_domain(&mut self, ctx: &PluginContext, domain: &str, parent: &Arc<Event>, affiliate: bool) -> Result<(), PluginError> {
        if !self.domains.insert(domain.to_string()) {
            ctx.debug(&format!("Skipping domain, {domain}, already processed."));
            return Ok(());
        }
        if affiliate {
            Self::emit(ctx, "AFFILIATE_DOMAIN_NAME", domain, parent)?;
        } else if ctx.target_matches(domain, false, true) {
            Self::emit(ctx, "DOMAIN_NAME", domain, parent)?;
        } else if parent.data().ends_with(&format!(".{domain}")) {
            Self::emit(ctx, "DOMAIN_NAME_PARENT", domain, parent)?;
        }
        Ok(())
    }

    /// Co-hosts and affiliates are only translated to their domains.
    fn translate_to_domain(&self, ctx: &PluginContext, event: &Arc<Event>) -> Result<(), PluginError> {
        let ev = if event.event_type().starts_with("AFFILIATE_") { "AFFILIATE_DOMAIN_NAME" } else { "CO_HOSTED_SITE_DOMAIN" };
        let psl = ctx.services().public_suffix_list();
        let data = event.data();
        if is_domain(data, &psl) {
            Self::emit(ctx, ev, data, event)?;
        }
        match host_domain(data, &psl) {
            Some(dom) if dom != data => {
                Self::emit(ctx, ev, &dom, event)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn scan_content(&mut self, ctx: &PluginContext, event: &Arc<Event>) -> Result<(), PluginError> {
        let data = normalize_content(event.event_type(), event.data());
        for name in ctx.target().names() {
            if ctx.check_for_stop() {
                return Ok(());
            }
            for host in hostnames_near(&data, &name) {
                self.process_host(ctx, &host, event, false)?;
            }
        }
        Ok(())
    }

    fn walk_netblock(&mut self, ctx: &PluginContext, event: &Arc<Event>) -> Result<(), PluginError> {
        if !self.opts.opt_bool("netblocklookup", true) {
            return Ok(());
        }
        let net: IpNet = event
            .data()
            .parse()
            .map_err(|e| PluginError::Data(format!("bad netblock {}: {e}", event.data())))?;
        let max = self.opts.opt_i64("maxnetblock", 24);
        if i64::from(net.prefix_len()) < max {
            ctx.debug(&format!("Network size bigger than permitted: {} > {max}", net.prefix_len()));
            return Ok(());
        }
        let IpNet::V4(net) = net else { return Ok(()) };

        ctx.debug(&format!("Looking up IPs in owned netblock: {net}"));
        for ip in netblock_hosts(&net) {
            if ctx.check_for_stop() {
                return Ok(());
            }
            let ip = ip.to_string();
            let names = ctx.services().resolve_ip(&ip);
            if names.is_empty() {
                continue;
            }
            ctx.debug(&format!("Found a reversed hostname from {ip} ({})", names.join(", ")));
            for name in names {
                if ctx.check_for_stop() {
                    return Ok(());
                }
                self.process_host(ctx, &name, event, false)?;
            }
        }
        Ok(())
    }
}

impl Plugin for SfpDnsResolve {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: NAME,
            summary: "Resolves Hosts and IP Addresses identified, also extracted from raw content.",
            flags: &[],
            use_cases: &["Footprint", "Investigate", "Passive"],
            categories: &["DNS"],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        let mut o = OptMap::new();
        o.insert("validatereverse".into(), true.into());
        o.insert("skipcommononwildcard".into(), true.into());
        o.insert("netblocklookup".into(), true.into());
        o.insert("maxnetblock".into(), 24.into());
        o
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        [
            ("skipcommononwildcard", "If wildcard DNS is detected, only attempt to look up the first common sub-domain from the common sub-domain list."),
            ("validatereverse", "Validate that reverse-resolved hostnames still resolve back to that IP before considering them as aliases of your target."),
            ("netblocklookup", "Look up all IPs on netblocks deemed to be owned by your target for possible hosts on the same target subdomain/domain?"),
            ("maxnetblock", "Maximum owned netblock size to look up all IPs within (CIDR value, 24 = /24, 16 = /16, etc.)"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(RESOLVABLE).into_iter().chain(str_list(CONTENT)).collect()
    }

    fn produced_events(&self) -> Vec<String> {
        str_list(&[
            "IP_ADDRESS",
            "INTERNET_NAME",
            "AFFILIATE_INTERNET_NAME",
            "AFFILIATE_IPADDR",
            "DOMAIN_NAME",
            "IPV6_ADDRESS",
            "DOMAIN_NAME_PARENT",
            "CO_HOSTED_SITE_DOMAIN",
            "AFFILIATE_DOMAIN_NAME",
            "INTERNET_NAME_UNRESOLVED",
        ])
    }

    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.opts = merge_opts(&self.opts(), user_opts);
        self.clear_listeners();
        self.ctx = Some(ctx);
        Ok(())
    }

    fn enrich_target(&mut self, target: &mut Target) {
        let Some(ctx) = self.ctx.clone() else { return };
        ctx.info("Identifying aliases for specified target(s)");
        let validate = self.opts.opt_bool("validatereverse", true);
        for host in resolve_targets(ctx.services().as_ref(), target, validate) {
            ctx.debug(&format!("Found an alias: {host}"));
            target.set_alias(&host, alias_type(&host));
        }
        let aliases: Vec<&str> = target.all_aliases().iter().map(|a| a.value.as_str()).collect();
        ctx.info(&format!("Aliases identified: {}", aliases.join(", ")));
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        let ctx = self.context()?;
        let event_type = event.event_type();
        if event.module() == NAME && event_type.contains("_NAME") {
            return Ok(());
        }
        ctx.debug(&format!("Received event, {event_type}, from {}", event.module()));

        if !self.seen_data.insert(event.data().to_string()) {
            ctx.debug("Skipping duplicate event.");
            return Ok(());
        }

        match event_type {
            "CO_HOSTED_SITE" | "AFFILIATE_INTERNET_NAME" => self.translate_to_domain(&ctx, event),
            "NETBLOCK_OWNER" => self.walk_netblock(&ctx, event),
            "IP_ADDRESS" | "IPV6_ADDRESS" | "INTERNET_NAME" | "AFFILIATE_IPADDR" => {
                let data = event.data();
                let services = ctx.services();
                let mut addrs = if event_type.contains("_NAME") { services.resolve_host(data) } else { services.resolve_ip(data) };
                if addrs.is_empty() {
                    return Ok(());
                }
                addrs.push(data.to_string());
                let affiliate_event = event_type.starts_with("AFFILIATE_");
                for addr in addrs {
                    if ctx.check_for_stop() {
                        return Ok(());
                    }
                    // Addresses a name resolves to count as part of the target.
                    let affiliate = !ctx.target_matches(&addr, false, true) && (affiliate_event || !is_ipv4(&addr));
                    self.process_host(&ctx, &addr, event, affiliate)?;
                }
                Ok(())
            }
            _ => self.scan_content(&ctx, event),
        }
    }

    fn clear_listeners(&mut self) {
        self.seen_data.clear();
        self.host_parents.clear();
        self.domains.clear();
    }
}

pub fn register(registry: &mut PluginRegistry) {
    registry.register(SfpDnsResolve::boxed);
}

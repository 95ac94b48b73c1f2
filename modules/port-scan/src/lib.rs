//! TCP connect scan of target addresses, with banner grabbing on open
//! ports.

use ipnet::IpNet;
use rand::seq::SliceRandom;
use spiderfoot_core::plugin::{merge_opts, str_list};
use spiderfoot_core::{
    Event, FetchRequest, OptMap, OptMapExt, Plugin, PluginContext, PluginError, PluginMeta, PluginRegistry,
};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const NAME: &str = "sfp_portscan_tcp";

const BANNER_BYTES: usize = 4096;

/// Commonly exposed ports on internet-facing systems.
const DEFAULT_PORTS: &[&str] = &[
    "21", "22", "23", "25", "53", "79", "80", "81", "88", "110", "111", "113", "119", "123", "137", "138", "139", "143",
    "161", "179", "389", "443", "445", "465", "512", "513", "514", "515", "3306", "5432", "1521", "2638", "1433",
    "3389", "5900", "5901", "5902", "5903", "5631", "631", "636", "990", "992", "993", "995", "1080", "8080", "8888",
    "9000",
];

/// Parse port entries; each may be a single port or a range (`"1-1024"`),
/// and may itself hold a comma-separated list.
pub fn parse_ports<S: AsRef<str>>(entries: &[S]) -> Result<Vec<u16>, PluginError> {
    let bad = |part: &str| PluginError::Configuration(format!("invalid port: {part}"));
    let mut ports = Vec::new();
    for entry in entries {
        for part in entry.as_ref().split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let s: u16 = start.trim().parse().map_err(|_| bad(part))?;
                let e: u16 = end.trim().parse().map_err(|_| bad(part))?;
                if s == 0 || s > e {
                    return Err(bad(part));
                }
                ports.extend(s..=e);
            } else {
                let p: u16 = part.parse().map_err(|_| bad(part))?;
                if p == 0 {
                    return Err(bad(part));
                }
                ports.push(p);
            }
        }
    }
    let mut seen = HashSet::new();
    ports.retain(|p| seen.insert(*p));
    Ok(ports)
}

/// Addresses to scan for an event: the address itself, or the hosts of
/// an owned netblock no larger than `/max_prefix`.
pub fn scan_addresses(data: &str, is_netblock: bool, max_prefix: u8) -> Result<Vec<IpAddr>, PluginError> {
    if !is_netblock {
        let ip = data.parse().map_err(|_| PluginError::Data(format!("not an address: {data}")))?;
        return Ok(vec![ip]);
    }
    let net: IpNet = data
        .parse()
        .map_err(|e| PluginError::Data(format!("Strange netblock identified, unable to parse: {data} ({e})")))?;
    // The limit is given for IPv4; IPv6 blocks get the same host count.
    let limit = if matches!(net, IpNet::V6(_)) { max_prefix.saturating_add(96) } else { max_prefix };
    if net.prefix_len() < limit {
        return Ok(Vec::new());
    }
    Ok(net
        .hosts()
        .filter(|ip| match ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                o[3] != 0 && !o.contains(&255)
            }
            IpAddr::V6(_) => true,
        })
        .collect())
}

/// Connect to `addr`; on success read whatever the service volunteers.
/// `None` when closed, `Some("")` when open but silent.
async fn try_port(addr: SocketAddr, wait: Duration) -> Option<String> {
    let mut stream = match timeout(wait, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        _ => return None,
    };
    let mut buf = vec![0u8; BANNER_BYTES];
    match timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(n)) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
        _ => Some(String::new()),
    }
}

/// Probe every port at once; results sorted by port.
async fn scan_batch(ip: IpAddr, ports: &[u16], wait: Duration) -> Vec<(u16, String)> {
    let (tx, mut rx) = mpsc::channel::<(u16, String)>(ports.len().max(1));
    for &port in ports {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(banner) = try_port(SocketAddr::new(ip, port), wait).await {
                let _ = tx.send((port, banner)).await;
            }
        });
    }
    drop(tx);
    let mut open = Vec::new();
    while let Some(r) = rx.recv().await {
        open.push(r);
    }
    open.sort_unstable_by_key(|(p, _)| *p);
    open
}

#[derive(Default)]
pub struct SfpPortscanTcp {
    ctx: Option<PluginContext>,
    opts: OptMap,
    rt: Option<Runtime>,
    ports: Vec<u16>,
    scanned: HashSet<IpAddr>,
}

impl SfpPortscanTcp {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::<SfpPortscanTcp>::default()
    }

    /// Port entries from the option, following an `@file` or URL reference
    /// in the first entry.
    fn port_entries(&self, ctx: &PluginContext) -> Result<Vec<String>, PluginError> {
        let entries = self.opts.opt_list("ports");
        let Some(first) = entries.first() else { return Ok(entries) };
        let listing = if let Some(path) = first.strip_prefix('@') {
            std::fs::read_to_string(path)
                .map_err(|e| PluginError::Configuration(format!("unable to read ports from {path}: {e}")))?
        } else if first.starts_with("http://") || first.starts_with("https://") {
            ctx.services()
                .fetch(&FetchRequest::get(first.as_str()))
                .content
                .ok_or_else(|| PluginError::Configuration(format!("unable to fetch ports from {first}")))?
        } else {
            return Ok(entries);
        };
        Ok(listing.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    fn report(ctx: &PluginContext, ip: IpAddr, open: Vec<(u16, String)>, source: &Arc<Event>) -> Result<(), PluginError> {
        for (port, banner) in open {
            let cp = SocketAddr::new(ip, port).to_string();
            ctx.info(&format!("TCP Port {cp} found to be OPEN."));
            let evt = Arc::new(Event::new("TCP_PORT_OPEN", cp, NAME, source)?);
            ctx.notify_listeners((*evt).clone());
            if !banner.is_empty() {
                ctx.notify_listeners(Event::new("TCP_PORT_OPEN_BANNER", banner, NAME, &evt)?);
            }
        }
        Ok(())
    }
}

impl Plugin for SfpPortscanTcp {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: NAME,
            summary: "Scans for commonly open TCP ports on Internet-facing systems.",
            flags: &["slow", "invasive"],
            use_cases: &["Footprint", "Investigate"],
            categories: &["Crawling and Scanning"],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        let mut o = OptMap::new();
        o.insert("ports".into(), str_list(DEFAULT_PORTS).into());
        o.insert("timeout".into(), 15.into());
        o.insert("maxthreads".into(), 10.into());
        o.insert("randomize".into(), true.into());
        o.insert("netblockscan".into(), true.into());
        o.insert("netblockscanmax".into(), 24.into());
        o
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        [
            ("maxthreads", "Number of ports to try to open simultaneously (number of threads to spawn at once.)"),
            ("ports", "The TCP ports to scan. Prefix with an '@' to iterate through a file containing ports to try (one per line), e.g. @/home/bob/ports.txt. Or supply a URL to load the list from there."),
            ("timeout", "Seconds before giving up on a port."),
            ("randomize", "Randomize the order of ports scanned."),
            ("netblockscan", "Port scan all IPs within identified owned netblocks?"),
            ("netblockscanmax", "Maximum netblock/subnet size to scan IPs within (CIDR value, 24 = /24, 16 = /16, etc.)"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&["IP_ADDRESS", "NETBLOCK_OWNER"])
    }

    fn produced_events(&self) -> Vec<String> {
        str_list(&["TCP_PORT_OPEN", "TCP_PORT_OPEN_BANNER"])
    }

    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.opts = merge_opts(&self.opts(), user_opts);
        self.scanned.clear();
        self.ports = parse_ports(&self.port_entries(&ctx)?)?;
        if self.ports.is_empty() {
            return Err(PluginError::Configuration("no ports to scan".into()));
        }
        if self.opts.opt_bool("randomize", true) {
            self.ports.shuffle(&mut rand::thread_rng());
        }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PluginError::Internal(format!("scanner runtime: {e}")))?;
        self.rt = Some(rt);
        self.ctx = Some(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        let (Some(ctx), Some(rt)) = (self.ctx.as_ref(), self.rt.as_ref()) else {
            return Err(PluginError::Internal("not set up".into()));
        };
        ctx.debug(&format!("Received event, {}, from {}", event.event_type(), event.module()));

        let is_netblock = event.event_type() == "NETBLOCK_OWNER";
        if is_netblock && !self.opts.opt_bool("netblockscan", true) {
            return Ok(());
        }
        let max_prefix = self.opts.opt_i64("netblockscanmax", 24).clamp(0, 128) as u8;
        let addrs = scan_addresses(event.data(), is_netblock, max_prefix)?;
        if is_netblock && addrs.is_empty() {
            ctx.debug(&format!("Skipping port scanning of {}, too big.", event.data()));
            return Ok(());
        }

        let wait = Duration::from_secs(self.opts.opt_i64("timeout", 15).max(1) as u64);
        let batch = self.opts.opt_i64("maxthreads", 10).max(1) as usize;
        for ip in addrs {
            if !self.scanned.insert(ip) {
                ctx.debug(&format!("Skipping {ip} as already scanned."));
                continue;
            }
            for ports in self.ports.chunks(batch) {
                if ctx.check_for_stop() {
                    return Ok(());
                }
                let open = rt.block_on(scan_batch(ip, ports, wait));
                Self::report(ctx, ip, open, event)?;
            }
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) {
    registry.register(SfpPortscanTcp::boxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiderfoot_core::testing::{plugin_context, seeded_event, CollectingSink, FakeServices};
    use spiderfoot_core::{Target, TargetType};
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn parse_lists_and_ranges() {
        assert_eq!(parse_ports(&["22", "80", "443"]).unwrap(), vec![22, 80, 443]);
        assert_eq!(parse_ports(&["1-3,5", "3"]).unwrap(), vec![1, 2, 3, 5]);
        assert!(parse_ports(&["0"]).is_err());
        assert!(parse_ports(&["10-5"]).is_err());
        assert!(parse_ports(&["http"]).is_err());
    }

    #[test]
    fn netblock_expansion() {
        let ips = scan_addresses("192.0.2.0/30", true, 24).unwrap();
        assert_eq!(ips.len(), 2);
        assert!(scan_addresses("10.0.0.0/8", true, 24).unwrap().is_empty());
        assert!(scan_addresses("nonsense", true, 24).is_err());
    }

    fn plugin(ports: &[u16]) -> (SfpPortscanTcp, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let target = Target::new("127.0.0.1", TargetType::IpAddress).unwrap();
        let ctx = plugin_context(NAME, target, Arc::new(FakeServices::new()), sink.clone());
        let mut opts = OptMap::new();
        let list: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
        opts.insert("ports".into(), list.into());
        opts.insert("timeout".into(), 2.into());
        opts.insert("randomize".into(), false.into());
        let mut p = SfpPortscanTcp::default();
        p.setup(ctx, &opts).unwrap();
        (p, sink)
    }

    fn closed_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    #[test]
    fn reports_open_ports_and_banners() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((mut s, _)) = listener.accept() {
                let _ = s.write_all(b"SSH-2.0-Test\r\n");
            }
        });
        let closed = closed_port();
        let (mut p, sink) = plugin(&[open, closed]);

        p.handle_event(&seeded_event("127.0.0.1", "IP_ADDRESS", "127.0.0.1")).unwrap();
        assert_eq!(sink.of_type("TCP_PORT_OPEN"), vec![format!("127.0.0.1:{open}")]);
        assert_eq!(sink.of_type("TCP_PORT_OPEN_BANNER"), vec!["SSH-2.0-Test\r\n"]);

        let banner = sink.events.lock().iter().find(|e| e.event_type() == "TCP_PORT_OPEN_BANNER").cloned().unwrap();
        assert_eq!(banner.source().map(|s| s.event_type()), Some("TCP_PORT_OPEN"));

        // Same address again is not rescanned.
        p.handle_event(&seeded_event("127.0.0.1", "IP_ADDRESS", "127.0.0.1")).unwrap();
        assert_eq!(sink.of_type("TCP_PORT_OPEN").len(), 1);
    }

    #[test]
    fn oversized_netblocks_are_skipped() {
        let (mut p, sink) = plugin(&[closed_port()]);
        p.handle_event(&seeded_event("127.0.0.1", "NETBLOCK_OWNER", "10.0.0.0/8")).unwrap();
        assert!(sink.emitted().is_empty());
    }

    #[test]
    fn port_list_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"22\n\n8080\n").unwrap();
        let sink = Arc::new(CollectingSink::default());
        let target = Target::new("127.0.0.1", TargetType::IpAddress).unwrap();
        let ctx = plugin_context(NAME, target, Arc::new(FakeServices::new()), sink);
        let mut opts = OptMap::new();
        opts.insert("ports".into(), vec![format!("@{}", file.path().display())].into());
        opts.insert("randomize".into(), false.into());
        let mut p = SfpPortscanTcp::default();
        p.setup(ctx, &opts).unwrap();
        assert_eq!(p.ports, vec![22, 8080]);
    }

    #[test]
    fn describes_itself() {
        let p = SfpPortscanTcp::default();
        assert_eq!(p.opts().keys().collect::<Vec<_>>(), p.optdescs().keys().collect::<Vec<_>>());
        assert!(p.produced_events().iter().all(|t| spiderfoot_core::event_types::is_known(t)));
    }
}

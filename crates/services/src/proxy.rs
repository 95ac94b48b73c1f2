use crate::ServicesError;
use spiderfoot_core::domain::is_valid_local_or_loopback_ip;
use spiderfoot_core::GlobalConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Socks4,
    Socks5,
    Http,
    Tor,
}

impl ProxyKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "4" => Some(ProxyKind::Socks4),
            "5" => Some(ProxyKind::Socks5),
            "HTTP" => Some(ProxyKind::Http),
            "TOR" => Some(ProxyKind::Tor),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Http => "http",
            ProxyKind::Tor => "socks5h",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ProxyKind::Socks4 | ProxyKind::Socks5 => 1080,
            ProxyKind::Http => 8080,
            ProxyKind::Tor => 9050,
        }
    }
}

/// Outbound proxy taken from the `_socks*` options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pwd: String,
}

impl ProxyConfig {
    /// `Ok(None)` when no proxy type is configured.
    pub fn from_config(cfg: &GlobalConfig) -> Result<Option<Self>, ServicesError> {
        if cfg.socks_type.trim().is_empty() {
            return Ok(None);
        }
        let kind = ProxyKind::parse(&cfg.socks_type)
            .ok_or_else(|| ServicesError::Config(format!("invalid proxy type: {}", cfg.socks_type)))?;
        let host = cfg.socks_addr.trim().to_lowercase();
        if host.is_empty() {
            return Err(ServicesError::Config("proxy type set but no proxy address".into()));
        }
        let port = match cfg.socks_port.trim() {
            "" => kind.default_port(),
            p => p
                .parse()
                .map_err(|_| ServicesError::Config(format!("invalid proxy port: {p}")))?,
        };
        Ok(Some(ProxyConfig {
            kind,
            host,
            port,
            user: cfg.socks_user.clone(),
            pwd: cfg.socks_pwd.clone(),
        }))
    }

    pub fn url(&self) -> String {
        let auth = match (self.user.is_empty(), self.pwd.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{}@", self.user),
            (false, false) => format!("{}:{}@", self.user, self.pwd),
        };
        format!("{}://{}{}:{}", self.kind.scheme(), auth, self.host, self.port)
    }

    /// Hosts that must be reached directly.
    pub fn bypass(&self, host: &str) -> bool {
        let host = host.trim_start_matches('[').trim_end_matches(']').to_lowercase();
        is_valid_local_or_loopback_ip(&host)
            || host == "localhost"
            || host.ends_with(".local")
            || host == self.host
    }
}

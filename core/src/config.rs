//! Global and per-plugin scan options.
//!
//! Options travel as loosely typed maps (`OptMap`) so that plugin defaults,
//! YAML overrides and values read back from the database all share one
//! shape. `GlobalConfig` is the typed view of the engine-wide keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub type OptMap = BTreeMap<String, Value>;

/// Typed accessors that tolerate the string forms stored in the database.
pub trait OptMapExt {
    fn opt_bool(&self, key: &str, default: bool) -> bool;
    fn opt_i64(&self, key: &str, default: i64) -> i64;
    fn opt_str(&self, key: &str, default: &str) -> String;
    fn opt_list(&self, key: &str) -> Vec<String>;
}

impl OptMapExt for OptMap {
    fn opt_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
            Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "True" | "yes"),
            _ => default,
        }
    }

    fn opt_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            Some(Value::Bool(b)) => i64::from(*b),
            _ => default,
        }
    }

    fn opt_str(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => default.to_string(),
            Some(other) => scalar_to_string(other),
        }
    }

    fn opt_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().map(scalar_to_string).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".into(),
        Value::Bool(false) => "0".into(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten one option value into its stored text form.
pub fn serialize_value(v: &Value) -> String {
    match v {
        Value::Array(items) => items.iter().map(scalar_to_string).collect::<Vec<_>>().join(","),
        other => scalar_to_string(other),
    }
}

/// Parse a stored text value back into the type of `reference`.
pub fn unserialize_value(s: &str, reference: &Value) -> Value {
    match reference {
        Value::Bool(_) => Value::Bool(s == "1" || s.eq_ignore_ascii_case("true")),
        Value::Number(n) if n.is_i64() || n.is_u64() => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| reference.clone()),
        Value::Number(_) => s.trim().parse::<f64>().map(Value::from).unwrap_or_else(|_| reference.clone()),
        Value::Array(items) => {
            if s.is_empty() {
                return Value::Array(Vec::new());
            }
            let numeric = matches!(items.first(), Some(Value::Number(_)));
            Value::Array(
                s.split(',')
                    .map(|x| {
                        if numeric {
                            x.trim().parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(x))
                        } else {
                            Value::from(x)
                        }
                    })
                    .collect(),
            )
        }
        _ => Value::String(s.to_string()),
    }
}

/// Flatten global and per-plugin options into `opt` / `plugin:opt` keys.
/// System keys (leading `__` globally, leading `_` in plugins) are skipped
/// when `filter_system` is set.
pub fn serialize_opts(
    global: &OptMap,
    modules: &BTreeMap<String, OptMap>,
    filter_system: bool,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (k, v) in global {
        if filter_system && k.starts_with("__") {
            continue;
        }
        out.insert(k.clone(), serialize_value(v));
    }
    for (module, opts) in modules {
        for (k, v) in opts {
            if filter_system && k.starts_with('_') {
                continue;
            }
            out.insert(format!("{module}:{k}"), serialize_value(v));
        }
    }
    out
}

/// Inverse of [`serialize_opts`]: overlays stored strings on the reference
/// maps, coercing each value to the reference's type. Unknown keys are
/// ignored.
pub fn unserialize_opts(
    stored: &BTreeMap<String, String>,
    global_ref: &OptMap,
    modules_ref: &BTreeMap<String, OptMap>,
) -> (OptMap, BTreeMap<String, OptMap>) {
    let mut global = global_ref.clone();
    for (k, reference) in global_ref {
        if let Some(s) = stored.get(k) {
            global.insert(k.clone(), unserialize_value(s, reference));
        }
    }
    let mut modules = modules_ref.clone();
    for (module, opts) in modules.iter_mut() {
        for (k, v) in opts.iter_mut() {
            if let Some(s) = stored.get(&format!("{module}:{k}")) {
                *v = unserialize_value(s, v);
            }
        }
    }
    (global, modules)
}

/// Engine-wide options. Field names on the wire keep the leading
/// underscores used throughout stored scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    #[serde(rename = "_debug")]
    pub debug: bool,
    #[serde(rename = "_maxthreads")]
    pub max_threads: usize,
    #[serde(rename = "_useragent")]
    pub user_agent: String,
    #[serde(rename = "_dnsserver")]
    pub dns_server: String,
    #[serde(rename = "_fetchtimeout")]
    pub fetch_timeout: u64,
    #[serde(rename = "_fetchqps")]
    pub fetch_qps: u32,
    #[serde(rename = "_internettlds")]
    pub internet_tlds: String,
    #[serde(rename = "_internettlds_cache")]
    pub internet_tlds_cache: u64,
    #[serde(rename = "_genericusers")]
    pub generic_users: Vec<String>,
    #[serde(rename = "_aborttimeout")]
    pub abort_timeout: u64,
    #[serde(rename = "_socks1type")]
    pub socks_type: String,
    #[serde(rename = "_socks2addr")]
    pub socks_addr: String,
    #[serde(rename = "_socks3port")]
    pub socks_port: String,
    #[serde(rename = "_socks4user")]
    pub socks_user: String,
    #[serde(rename = "_socks5pwd")]
    pub socks_pwd: String,
    #[serde(rename = "_socks6dns")]
    pub socks_dns: bool,
    #[serde(rename = "_torctlport")]
    pub tor_ctl_port: u16,
    #[serde(rename = "__database")]
    pub database: String,
    #[serde(rename = "__cachedir")]
    pub cache_dir: String,
    #[serde(rename = "__logging")]
    pub logging: bool,
    #[serde(rename = "__outputfilter")]
    pub output_filter: Vec<String>,
}

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:23.0) Gecko/20100101 Firefox/23.0";

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            debug: false,
            max_threads: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            dns_server: String::new(),
            fetch_timeout: 5,
            fetch_qps: 0,
            internet_tlds: "https://publicsuffix.org/list/effective_tld_names.dat".to_string(),
            internet_tlds_cache: 72,
            generic_users: [
                "abuse", "admin", "billing", "compliance", "devnull", "dns", "ftp", "hostmaster",
                "inoc", "ispfeedback", "ispsupport", "list-request", "list", "maildaemon",
                "marketing", "noc", "no-reply", "noreply", "null", "peering", "peering-notify",
                "peering-request", "phish", "phishing", "postmaster", "privacy", "registrar",
                "registry", "root", "routing-registry", "rr", "sales", "security", "spam",
                "support", "sysadmin", "tech", "undisclosed-recipients", "unsubscribe",
                "usenet", "uucp", "webmaster", "www",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            abort_timeout: 30,
            socks_type: String::new(),
            socks_addr: String::new(),
            socks_port: String::new(),
            socks_user: String::new(),
            socks_pwd: String::new(),
            socks_dns: true,
            tor_ctl_port: 9051,
            database: "spiderfoot.db".to_string(),
            cache_dir: "cache".to_string(),
            logging: true,
            output_filter: Vec::new(),
        }
    }
}

impl GlobalConfig {
    pub fn to_opts(&self) -> OptMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(m)) => m.into_iter().collect(),
            _ => OptMap::new(),
        }
    }

    /// Overlay `opts` on the defaults, coercing string values by the
    /// default's type.
    pub fn from_opts(opts: &OptMap) -> Result<Self> {
        let defaults = GlobalConfig::default().to_opts();
        let mut merged: Map<String, Value> = defaults.clone().into_iter().collect();
        for (k, v) in opts {
            let v = match (v, defaults.get(k)) {
                (Value::String(s), Some(reference)) if !reference.is_string() => unserialize_value(s, reference),
                _ => v.clone(),
            };
            merged.insert(k.clone(), v);
        }
        serde_json::from_value(Value::Object(merged)).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn optdescs() -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([
            ("_debug", "Enable debugging?"),
            ("_maxthreads", "Max number of modules to run concurrently. 0 delivers events on the scan thread."),
            ("_useragent", "User-Agent string to use for HTTP requests."),
            ("_dnsserver", "Override the default resolver with another DNS server. For example, 8.8.8.8 is Google's open DNS server."),
            ("_fetchtimeout", "Number of seconds before giving up on a HTTP request."),
            ("_fetchqps", "Maximum HTTP requests per second across all modules. 0 disables pacing."),
            ("_internettlds", "List of Internet TLDs."),
            ("_internettlds_cache", "Hours to cache the Internet TLD list. This can safely be quite a long time given that the list doesn't change too often."),
            ("_genericusers", "List of usernames that if found as usernames or as part of e-mail addresses, should be treated differently to non-generics."),
            ("_aborttimeout", "Seconds to wait for running modules after a stop request before the scan is marked aborted."),
            ("_socks1type", "SOCKS Server Type. Can be '4', '5', 'HTTP' or 'TOR'"),
            ("_socks2addr", "SOCKS Server IP Address."),
            ("_socks3port", "SOCKS Server TCP Port. Usually 1080 for 4/5, 8080 for HTTP and 9050 for TOR."),
            ("_socks4user", "SOCKS Username. Valid only for SOCKS4 and SOCKS5 servers."),
            ("_socks5pwd", "SOCKS Password. Valid only for SOCKS5 servers."),
            ("_socks6dns", "Resolve DNS through the SOCKS proxy? Has no affect when TOR is used: Will always be True."),
            ("_torctlport", "The port TOR is taking control commands on."),
            ("__database", "Path to the SQLite database."),
            ("__cachedir", "Directory holding cached downloads."),
            ("__logging", "Persist scan log messages to the database."),
            ("__outputfilter", "Only propagate events of these types (plus ROOT and the target's own type)."),
            ("_modulesenabled", "Modules enabled for the scan."),
        ])
    }
}

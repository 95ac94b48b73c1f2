//! Scan target identity, aliases and scope matching.

use ipnet::IpNet;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    #[serde(rename = "IP_ADDRESS")]
    IpAddress,
    #[serde(rename = "IPV6_ADDRESS")]
    Ipv6Address,
    #[serde(rename = "NETBLOCK_OWNER")]
    NetblockOwner,
    #[serde(rename = "NETBLOCKV6_OWNER")]
    Netblockv6Owner,
    #[serde(rename = "INTERNET_NAME")]
    InternetName,
    #[serde(rename = "EMAILADDR")]
    EmailAddr,
    #[serde(rename = "HUMAN_NAME")]
    HumanName,
    #[serde(rename = "BGP_AS_OWNER")]
    BgpAsOwner,
    #[serde(rename = "PHONE_NUMBER")]
    PhoneNumber,
    #[serde(rename = "USERNAME")]
    Username,
    #[serde(rename = "BITCOIN_ADDRESS")]
    BitcoinAddress,
}

impl TargetType {
    pub const ALL: [TargetType; 11] = [
        TargetType::IpAddress,
        TargetType::Ipv6Address,
        TargetType::NetblockOwner,
        TargetType::Netblockv6Owner,
        TargetType::InternetName,
        TargetType::EmailAddr,
        TargetType::HumanName,
        TargetType::BgpAsOwner,
        TargetType::PhoneNumber,
        TargetType::Username,
        TargetType::BitcoinAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::IpAddress => "IP_ADDRESS",
            TargetType::Ipv6Address => "IPV6_ADDRESS",
            TargetType::NetblockOwner => "NETBLOCK_OWNER",
            TargetType::Netblockv6Owner => "NETBLOCKV6_OWNER",
            TargetType::InternetName => "INTERNET_NAME",
            TargetType::EmailAddr => "EMAILADDR",
            TargetType::HumanName => "HUMAN_NAME",
            TargetType::BgpAsOwner => "BGP_AS_OWNER",
            TargetType::PhoneNumber => "PHONE_NUMBER",
            TargetType::Username => "USERNAME",
            TargetType::BitcoinAddress => "BITCOIN_ADDRESS",
        }
    }

    /// Types for which scope cannot be judged; everything matches.
    fn is_unscoped(&self) -> bool {
        matches!(
            self,
            TargetType::HumanName
                | TargetType::PhoneNumber
                | TargetType::Username
                | TargetType::BgpAsOwner
                | TargetType::BitcoinAddress
        )
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TargetType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("{s} is not a valid target type")))
    }
}

fn type_table() -> &'static [(Regex, TargetType)] {
    static TABLE: OnceLock<Vec<(Regex, TargetType)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let rows: [(&str, TargetType); 11] = [
            (r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$", TargetType::IpAddress),
            (r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d+$", TargetType::NetblockOwner),
            (r"^.*@.*$", TargetType::EmailAddr),
            (r"^\+[0-9]+$", TargetType::PhoneNumber),
            (r#"^".+\s+.+"$"#, TargetType::HumanName),
            (r#"^".+"$"#, TargetType::Username),
            (r"^[0-9]+$", TargetType::BgpAsOwner),
            (r"^[0-9a-f:]+$", TargetType::Ipv6Address),
            (r"^[0-9a-f:]+::/[0-9]+$", TargetType::Netblockv6Owner),
            (
                r"^(([a-z0-9]|[a-z0-9][a-z0-9\-]*[a-z0-9])\.)+([a-z0-9]|[a-z0-9][a-z0-9\-]*[a-z0-9])$",
                TargetType::InternetName,
            ),
            (
                r"^(bc(0([ac-hj-np-z02-9]{39}|[ac-hj-np-z02-9]{59})|1[ac-hj-np-z02-9]{8,87})|[13][a-km-zA-HJ-NP-Z1-9]{25,35})$",
                TargetType::BitcoinAddress,
            ),
        ];
        rows.into_iter()
            .filter_map(|(pat, t)| {
                RegexBuilder::new(pat)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|re| (re, t))
            })
            .collect()
    })
}

/// Guess the target type of a seed string. Patterns are tried in a fixed
/// order and the first hit wins.
pub fn target_type_from_string(s: &str) -> Option<TargetType> {
    if s.is_empty() {
        return None;
    }
    type_table().iter().find(|(re, _)| re.is_match(s)).map(|(_, t)| *t)
}

/// Strip the quotes used to mark human names and usernames on input.
pub fn normalize_seed(value: &str, t: TargetType) -> String {
    match t {
        TargetType::HumanName | TargetType::Username => value.trim_matches('"').to_string(),
        _ => value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    #[serde(rename = "type")]
    pub alias_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    value: String,
    target_type: TargetType,
    aliases: Vec<Alias>,
}

impl Target {
    pub fn new(value: &str, target_type: TargetType) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::Target("target value is blank".into()));
        }
        Ok(Target { value: value.to_string(), target_type, aliases: Vec::new() })
    }

    /// Build from a type name as stored or typed by a user.
    pub fn parse(value: &str, type_name: &str) -> Result<Self> {
        let t = type_name
            .parse::<TargetType>()
            .map_err(|_| Error::Target(format!("{type_name} is not a valid target type")))?;
        Target::new(value, t)
    }

    pub fn value(&self) -> &str { &self.value }
    pub fn target_type(&self) -> TargetType { self.target_type }
    pub fn all_aliases(&self) -> &[Alias] { &self.aliases }

    pub fn set_alias(&mut self, value: &str, alias_type: &str) {
        if value.is_empty() || alias_type.is_empty() {
            return;
        }
        let alias = Alias { alias_type: alias_type.to_string(), value: value.to_lowercase() };
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }

    pub fn aliases(&self, types: &[&str]) -> Vec<&Alias> {
        self.aliases.iter().filter(|a| types.contains(&a.alias_type.as_str())).collect()
    }

    fn equivalents(&self, alias_type: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|a| a.alias_type == alias_type)
            .map(|a| a.value.clone())
            .collect()
    }

    /// Host and domain names considered part of the target.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.equivalents("INTERNET_NAME");
        let own = match self.target_type {
            TargetType::InternetName => Some(self.value.to_lowercase()),
            TargetType::EmailAddr => self.value.rsplit_once('@').map(|(_, d)| d.to_lowercase()),
            _ => None,
        };
        if let Some(n) = own {
            if !n.is_empty() && !names.contains(&n) {
                names.push(n);
            }
        }
        names
    }

    /// IPv4 and IPv6 addresses considered part of the target.
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs = self.equivalents("IP_ADDRESS");
        addrs.extend(self.equivalents("IPV6_ADDRESS"));
        if matches!(self.target_type, TargetType::IpAddress | TargetType::Ipv6Address) {
            let v = self.value.to_lowercase();
            if !addrs.contains(&v) {
                addrs.push(v);
            }
        }
        addrs
    }

    fn netblocks(&self) -> Vec<IpNet> {
        let mut out: Vec<IpNet> = self
            .aliases
            .iter()
            .filter(|a| a.alias_type == "NETBLOCK_OWNER" || a.alias_type == "NETBLOCKV6_OWNER")
            .filter_map(|a| a.value.parse().ok())
            .collect();
        if matches!(self.target_type, TargetType::NetblockOwner | TargetType::Netblockv6Owner) {
            if let Ok(net) = self.value.parse::<IpNet>() {
                out.push(net);
            }
        }
        out
    }

    /// Whether `value` (a host name, domain or IP) belongs to the target.
    ///
    /// `include_parents` accepts parent domains of a target name;
    /// `include_children` accepts sub-domains of a target name.
    pub fn matches(&self, value: &str, include_parents: bool, include_children: bool) -> bool {
        let value = value.to_lowercase();
        if value.is_empty() {
            return false;
        }
        if self.target_type.is_unscoped() {
            return true;
        }
        if let Ok(ip) = value.parse::<IpAddr>() {
            if self.addresses().iter().any(|a| a.parse::<IpAddr>().map(|x| x == ip).unwrap_or(false)) {
                return true;
            }
            return self.netblocks().iter().any(|n| n.contains(&ip));
        }
        self.names().iter().any(|name| {
            value == *name
                || (include_parents && name.ends_with(&format!(".{value}")))
                || (include_children && value.ends_with(&format!(".{name}")))
        })
    }
}

//! Built-in event type vocabulary.
//!
//! Every event carries one of these names. The table is loaded into
//! `tbl_event_types` when a database is first created; new rows can be
//! added there without touching this file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::Error;

/// Coarse classification used by the graph export and the correlation
/// entity walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Entity,
    Descriptor,
    Subentity,
    Data,
    Internal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entity => "ENTITY",
            EventKind::Descriptor => "DESCRIPTOR",
            EventKind::Subentity => "SUBENTITY",
            EventKind::Data => "DATA",
            EventKind::Internal => "INTERNAL",
        }
    }

    /// Entity and internal events become graph nodes.
    pub fn is_node(&self) -> bool {
        matches!(self, EventKind::Entity | EventKind::Internal)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTITY" => Ok(EventKind::Entity),
            "DESCRIPTOR" => Ok(EventKind::Descriptor),
            "SUBENTITY" => Ok(EventKind::Subentity),
            "DATA" => Ok(EventKind::Data),
            "INTERNAL" => Ok(EventKind::Internal),
            other => Err(Error::Validation(format!("unknown event kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTypeInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub raw: bool,
    pub kind: EventKind,
}

const fn row(name: &'static str, description: &'static str, raw: bool, kind: EventKind) -> EventTypeInfo {
    EventTypeInfo { name, description, raw, kind }
}

use EventKind::*;

static EVENT_TYPES: &[EventTypeInfo] = &[
    row("ROOT", "Internal SpiderFoot Root event", true, Internal),
    row("ACCOUNT_EXTERNAL_OWNED", "Account on External Site", false, Entity),
    row("ACCOUNT_EXTERNAL_OWNED_COMPROMISED", "Hacked Account on External Site", false, Descriptor),
    row("ACCOUNT_EXTERNAL_USER_SHARED_COMPROMISED", "Hacked User Account on External Site", false, Descriptor),
    row("AFFILIATE_EMAILADDR", "Affiliate - Email Address", false, Entity),
    row("AFFILIATE_INTERNET_NAME", "Affiliate - Internet Name", false, Entity),
    row("AFFILIATE_INTERNET_NAME_HIJACKABLE", "Affiliate - Internet Name Hijackable", false, Entity),
    row("AFFILIATE_INTERNET_NAME_UNRESOLVED", "Affiliate - Internet Name - Unresolved", false, Entity),
    row("AFFILIATE_IPADDR", "Affiliate - IP Address", false, Entity),
    row("AFFILIATE_IPV6_ADDRESS", "Affiliate - IPv6 Address", false, Entity),
    row("AFFILIATE_WEB_CONTENT", "Affiliate - Web Content", true, Data),
    row("AFFILIATE_DOMAIN_NAME", "Affiliate - Domain Name", false, Entity),
    row("AFFILIATE_DOMAIN_UNREGISTERED", "Affiliate - Domain Name Unregistered", false, Entity),
    row("AFFILIATE_COMPANY_NAME", "Affiliate - Company Name", false, Entity),
    row("AFFILIATE_DOMAIN_WHOIS", "Affiliate - Domain Whois", true, Data),
    row("AFFILIATE_DESCRIPTION_CATEGORY", "Affiliate Description - Category", false, Descriptor),
    row("AFFILIATE_DESCRIPTION_ABSTRACT", "Affiliate Description - Abstract", false, Descriptor),
    row("APPSTORE_ENTRY", "App Store Entry", false, Entity),
    row("CLOUD_STORAGE_BUCKET", "Cloud Storage Bucket", false, Entity),
    row("CLOUD_STORAGE_BUCKET_OPEN", "Cloud Storage Bucket Open", false, Descriptor),
    row("COMPANY_NAME", "Company Name", false, Entity),
    row("CREDIT_CARD_NUMBER", "Credit Card Number", false, Entity),
    row("BASE64_DATA", "Base64-encoded Data", true, Data),
    row("BITCOIN_ADDRESS", "Bitcoin Address", false, Entity),
    row("BITCOIN_BALANCE", "Bitcoin Balance", false, Descriptor),
    row("BGP_AS_OWNER", "BGP AS Ownership", false, Entity),
    row("BGP_AS_MEMBER", "BGP AS Membership", false, Entity),
    row("BLACKLISTED_COHOST", "Blacklisted Co-Hosted Site", false, Descriptor),
    row("BLACKLISTED_INTERNET_NAME", "Blacklisted Internet Name", false, Descriptor),
    row("BLACKLISTED_AFFILIATE_INTERNET_NAME", "Blacklisted Affiliate Internet Name", false, Descriptor),
    row("BLACKLISTED_IPADDR", "Blacklisted IP Address", false, Descriptor),
    row("BLACKLISTED_AFFILIATE_IPADDR", "Blacklisted Affiliate IP Address", false, Descriptor),
    row("BLACKLISTED_SUBNET", "Blacklisted IP on Same Subnet", false, Descriptor),
    row("BLACKLISTED_NETBLOCK", "Blacklisted IP on Owned Netblock", false, Descriptor),
    row("COUNTRY_NAME", "Country Name", false, Entity),
    row("CO_HOSTED_SITE", "Co-Hosted Site", false, Entity),
    row("CO_HOSTED_SITE_DOMAIN", "Co-Hosted Site - Domain Name", false, Entity),
    row("CO_HOSTED_SITE_DOMAIN_WHOIS", "Co-Hosted Site - Domain Whois", true, Data),
    row("DARKNET_MENTION_URL", "Darknet Mention URL", false, Descriptor),
    row("DARKNET_MENTION_CONTENT", "Darknet Mention Web Content", true, Data),
    row("DATE_HUMAN_DOB", "Date of Birth", false, Entity),
    row("DEFACED_INTERNET_NAME", "Defaced", false, Descriptor),
    row("DEFACED_IPADDR", "Defaced IP Address", false, Descriptor),
    row("DEFACED_AFFILIATE_INTERNET_NAME", "Defaced Affiliate", false, Descriptor),
    row("DEFACED_COHOST", "Defaced Co-Hosted Site", false, Descriptor),
    row("DEFACED_AFFILIATE_IPADDR", "Defaced Affiliate IP Address", false, Descriptor),
    row("DESCRIPTION_CATEGORY", "Description - Category", false, Descriptor),
    row("DESCRIPTION_ABSTRACT", "Description - Abstract", false, Descriptor),
    row("DEVICE_TYPE", "Device Type", false, Descriptor),
    row("DNS_TEXT", "DNS TXT Record", false, Data),
    row("DNS_SRV", "DNS SRV Record", false, Data),
    row("DNS_SPF", "DNS SPF Record", false, Data),
    row("DOMAIN_NAME", "Domain Name", false, Entity),
    row("DOMAIN_NAME_PARENT", "Domain Name (Parent)", false, Entity),
    row("DOMAIN_REGISTRAR", "Domain Registrar", false, Entity),
    row("DOMAIN_WHOIS", "Domain Whois", true, Data),
    row("EMAILADDR", "Email Address", false, Entity),
    row("EMAILADDR_COMPROMISED", "Hacked Email Address", false, Descriptor),
    row("EMAILADDR_DELIVERABLE", "Deliverable Email Address", false, Descriptor),
    row("EMAILADDR_DISPOSABLE", "Disposable Email Address", false, Descriptor),
    row("EMAILADDR_GENERIC", "Email Address - Generic", false, Entity),
    row("EMAILADDR_UNDELIVERABLE", "Undeliverable Email Address", false, Descriptor),
    row("ERROR_MESSAGE", "Error Message", false, Data),
    row("ETHEREUM_ADDRESS", "Ethereum Address", false, Entity),
    row("ETHEREUM_BALANCE", "Ethereum Balance", false, Descriptor),
    row("GEOINFO", "Physical Location", false, Descriptor),
    row("HASH", "Hash", false, Data),
    row("HASH_COMPROMISED", "Compromised Password Hash", false, Data),
    row("HTTP_CODE", "HTTP Status Code", false, Data),
    row("HUMAN_NAME", "Human Name", false, Entity),
    row("IBAN_NUMBER", "IBAN Number", false, Entity),
    row("INTERESTING_FILE", "Interesting File", false, Descriptor),
    row("INTERESTING_FILE_HISTORIC", "Historic Interesting File", false, Descriptor),
    row("JUNK_FILE", "Junk File", false, Descriptor),
    row("INTERNAL_IP_ADDRESS", "IP Address - Internal Network", false, Entity),
    row("INTERNET_NAME", "Internet Name", false, Entity),
    row("INTERNET_NAME_UNRESOLVED", "Internet Name - Unresolved", false, Entity),
    row("IP_ADDRESS", "IP Address", false, Entity),
    row("IPV6_ADDRESS", "IPv6 Address", false, Entity),
    row("LEI", "Legal Entity Identifier", false, Entity),
    row("JOB_TITLE", "Job Title", false, Descriptor),
    row("LINKED_URL_INTERNAL", "Linked URL - Internal", false, Subentity),
    row("LINKED_URL_EXTERNAL", "Linked URL - External", false, Subentity),
    row("MALICIOUS_ASN", "Malicious AS", false, Descriptor),
    row("MALICIOUS_BITCOIN_ADDRESS", "Malicious Bitcoin Address", false, Descriptor),
    row("MALICIOUS_IPADDR", "Malicious IP Address", false, Descriptor),
    row("MALICIOUS_COHOST", "Malicious Co-Hosted Site", false, Descriptor),
    row("MALICIOUS_EMAILADDR", "Malicious E-mail Address", false, Descriptor),
    row("MALICIOUS_INTERNET_NAME", "Malicious Internet Name", false, Descriptor),
    row("MALICIOUS_AFFILIATE_INTERNET_NAME", "Malicious Affiliate", false, Descriptor),
    row("MALICIOUS_AFFILIATE_IPADDR", "Malicious Affiliate IP Address", false, Descriptor),
    row("MALICIOUS_NETBLOCK", "Malicious IP on Owned Netblock", false, Descriptor),
    row("MALICIOUS_PHONE_NUMBER", "Malicious Phone Number", false, Descriptor),
    row("MALICIOUS_SUBNET", "Malicious IP on Same Subnet", false, Descriptor),
    row("NETBLOCK_OWNER", "Netblock Ownership", false, Entity),
    row("NETBLOCKV6_OWNER", "Netblock IPv6 Ownership", false, Entity),
    row("NETBLOCK_MEMBER", "Netblock Membership", false, Entity),
    row("NETBLOCKV6_MEMBER", "Netblock IPv6 Membership", false, Entity),
    row("NETBLOCK_WHOIS", "Netblock Whois", true, Data),
    row("OPERATING_SYSTEM", "Operating System", false, Descriptor),
    row("LEAKSITE_URL", "Leak Site URL", false, Entity),
    row("LEAKSITE_CONTENT", "Leak Site Content", true, Data),
    row("PASSWORD_COMPROMISED", "Compromised Password", false, Data),
    row("PHONE_NUMBER", "Phone Number", false, Entity),
    row("PHONE_NUMBER_COMPROMISED", "Phone Number Compromised", false, Descriptor),
    row("PHONE_NUMBER_TYPE", "Phone Number Type", false, Descriptor),
    row("PHYSICAL_ADDRESS", "Physical Address", false, Entity),
    row("PHYSICAL_COORDINATES", "Physical Coordinates", false, Entity),
    row("PGP_KEY", "PGP Public Key", false, Data),
    row("PROXY_HOST", "Proxy Host", false, Descriptor),
    row("PROVIDER_DNS", "Name Server (DNS NS Records)", false, Entity),
    row("PROVIDER_JAVASCRIPT", "Externally Hosted Javascript", false, Entity),
    row("PROVIDER_MAIL", "Email Gateway (DNS MX Records)", false, Entity),
    row("PROVIDER_HOSTING", "Hosting Provider", false, Entity),
    row("PROVIDER_TELCO", "Telecommunications Provider", false, Entity),
    row("PUBLIC_CODE_REPO", "Public Code Repository", false, Entity),
    row("RAW_RIR_DATA", "Raw Data from RIRs/APIs", true, Data),
    row("RAW_DNS_RECORDS", "Raw DNS Records", true, Data),
    row("RAW_FILE_META_DATA", "Raw File Meta Data", true, Data),
    row("SEARCH_ENGINE_WEB_CONTENT", "Search Engine Web Content", true, Data),
    row("SOCIAL_MEDIA", "Social Media Presence", false, Entity),
    row("SIMILAR_ACCOUNT_EXTERNAL", "Similar Account on External Site", false, Entity),
    row("SIMILARDOMAIN", "Similar Domain", false, Entity),
    row("SIMILARDOMAIN_WHOIS", "Similar Domain - Whois", true, Data),
    row("SOFTWARE_USED", "Software Used", false, Subentity),
    row("SSL_CERTIFICATE_RAW", "SSL Certificate - Raw Data", true, Data),
    row("SSL_CERTIFICATE_ISSUED", "SSL Certificate - Issued to", false, Entity),
    row("SSL_CERTIFICATE_ISSUER", "SSL Certificate - Issued by", false, Entity),
    row("SSL_CERTIFICATE_MISMATCH", "SSL Certificate Host Mismatch", false, Descriptor),
    row("SSL_CERTIFICATE_EXPIRED", "SSL Certificate Expired", false, Descriptor),
    row("SSL_CERTIFICATE_EXPIRING", "SSL Certificate Expiring", false, Descriptor),
    row("TARGET_WEB_CONTENT", "Web Content", true, Data),
    row("TARGET_WEB_CONTENT_TYPE", "Web Content Type", false, Descriptor),
    row("TARGET_WEB_COOKIE", "Cookies", false, Data),
    row("TCP_PORT_OPEN", "Open TCP Port", false, Subentity),
    row("TCP_PORT_OPEN_BANNER", "Open TCP Port Banner", false, Data),
    row("TOR_EXIT_NODE", "TOR Exit Node", false, Descriptor),
    row("UDP_PORT_OPEN", "Open UDP Port", false, Subentity),
    row("UDP_PORT_OPEN_INFO", "Open UDP Port Information", false, Data),
    row("URL_ADBLOCKED_EXTERNAL", "URL (AdBlocked External)", false, Descriptor),
    row("URL_ADBLOCKED_INTERNAL", "URL (AdBlocked Internal)", false, Descriptor),
    row("URL_FORM", "URL (Form)", false, Descriptor),
    row("URL_FLASH", "URL (Uses Flash)", false, Descriptor),
    row("URL_JAVASCRIPT", "URL (Uses Javascript)", false, Descriptor),
    row("URL_WEB_FRAMEWORK", "URL (Uses a Web Framework)", false, Descriptor),
    row("URL_JAVA_APPLET", "URL (Uses Java Applet)", false, Descriptor),
    row("URL_STATIC", "URL (Purely Static)", false, Descriptor),
    row("URL_PASSWORD", "URL (Accepts Passwords)", false, Descriptor),
    row("URL_UPLOAD", "URL (Accepts Uploads)", false, Descriptor),
    row("URL_FORM_HISTORIC", "Historic URL (Form)", false, Descriptor),
    row("URL_FLASH_HISTORIC", "Historic URL (Uses Flash)", false, Descriptor),
    row("URL_JAVASCRIPT_HISTORIC", "Historic URL (Uses Javascript)", false, Descriptor),
    row("URL_WEB_FRAMEWORK_HISTORIC", "Historic URL (Uses a Web Framework)", false, Descriptor),
    row("URL_JAVA_APPLET_HISTORIC", "Historic URL (Uses Java Applet)", false, Descriptor),
    row("URL_STATIC_HISTORIC", "Historic URL (Purely Static)", false, Descriptor),
    row("URL_PASSWORD_HISTORIC", "Historic URL (Accepts Passwords)", false, Descriptor),
    row("URL_UPLOAD_HISTORIC", "Historic URL (Accepts Uploads)", false, Descriptor),
    row("USERNAME", "Username", false, Entity),
    row("VPN_HOST", "VPN Host", false, Descriptor),
    row("VULNERABILITY_DISCLOSURE", "Vulnerability - Third Party Disclosure", false, Descriptor),
    row("VULNERABILITY_CVE_CRITICAL", "Vulnerability - CVE Critical", false, Descriptor),
    row("VULNERABILITY_CVE_HIGH", "Vulnerability - CVE High", false, Descriptor),
    row("VULNERABILITY_CVE_MEDIUM", "Vulnerability - CVE Medium", false, Descriptor),
    row("VULNERABILITY_CVE_LOW", "Vulnerability - CVE Low", false, Descriptor),
    row("VULNERABILITY_GENERAL", "Vulnerability - General", false, Descriptor),
    row("WEB_ANALYTICS_ID", "Web Analytics", false, Entity),
    row("WEBSERVER_BANNER", "Web Server", false, Data),
    row("WEBSERVER_HTTPHEADERS", "HTTP Headers", true, Data),
    row("WEBSERVER_STRANGEHEADER", "Non-Standard HTTP Header", false, Data),
    row("WEBSERVER_TECHNOLOGY", "Web Technology", false, Descriptor),
    row("WIFI_ACCESS_POINT", "WiFi Access Point Nearby", false, Entity),
    row("WIKIPEDIA_PAGE_EDIT", "Wikipedia Page Edit", false, Descriptor),
];

fn index() -> &'static HashMap<&'static str, &'static EventTypeInfo> {
    static INDEX: OnceLock<HashMap<&'static str, &'static EventTypeInfo>> = OnceLock::new();
    INDEX.get_or_init(|| EVENT_TYPES.iter().map(|t| (t.name, t)).collect())
}

pub fn all() -> &'static [EventTypeInfo] {
    EVENT_TYPES
}

pub fn lookup(name: &str) -> Option<&'static EventTypeInfo> {
    index().get(name).copied()
}

pub fn is_known(name: &str) -> bool {
    index().contains_key(name)
}

pub fn kind_of(name: &str) -> Option<EventKind> {
    lookup(name).map(|t| t.kind)
}

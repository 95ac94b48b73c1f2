//! Link extraction from HTML and robots.txt parsing.

use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Tags carrying a link and the attribute that holds it.
const LINK_ATTRS: &[(&str, &str)] = &[
    ("a", "href"),
    ("img", "src"),
    ("script", "src"),
    ("link", "href"),
    ("area", "href"),
    ("base", "href"),
    ("form", "action"),
];

fn tag_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<\s*([a-z]+)\b[^>]*>").ok()).as_ref()
}

fn attr_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)\s([a-z\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).ok())
        .as_ref()
}

fn in_page_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#.[^/]+").ok()).as_ref()
}

/// Raw link attribute values in document order.
fn raw_links(html: &str) -> Vec<String> {
    let (Some(tags), Some(attrs)) = (tag_re(), attr_re()) else { return Vec::new() };
    let mut out = Vec::new();
    for tag in tags.captures_iter(html) {
        let name = tag[1].to_lowercase();
        let Some((_, wanted)) = LINK_ATTRS.iter().find(|(t, _)| *t == name) else { continue };
        for attr in attrs.captures_iter(&tag[0]) {
            if !attr[1].eq_ignore_ascii_case(wanted) {
                continue;
            }
            let value = attr.get(2).or_else(|| attr.get(3)).or_else(|| attr.get(4)).map_or("", |m| m.as_str());
            out.push(value.replace("&amp;", "&"));
            break;
        }
    }
    out
}

/// Absolute links found in `html` fetched from `page`. `domains` are the
/// target names: a bare mention of one is taken as a link to it.
pub fn parse_links(page: &str, html: &str, domains: &[String]) -> Vec<String> {
    let Ok(base) = Url::parse(page) else { return Vec::new() };
    let proto = page.split(':').next().unwrap_or("http");
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for link in raw_links(html) {
        let mut link = link.trim().to_string();
        let lower = link.to_lowercase();
        if link.is_empty() {
            continue;
        }
        // Fragments of URLs assembled in script code.
        if link.ends_with('.') || link.starts_with('+') || lower.contains("javascript:") || link.contains("()") {
            continue;
        }
        if in_page_re().is_some_and(|re| re.is_match(&link)) || lower.contains("mailto:") {
            continue;
        }
        if lower.contains("%2f") {
            link = percent_decode_str(&link).decode_utf8_lossy().into_owned();
        }

        let absolute = if link.contains("://") {
            Some(link)
        } else if !link.starts_with('/') && domains.iter().any(|d| lower.contains(&d.to_lowercase())) {
            Some(format!("{proto}://{link}"))
        } else {
            base.join(&link).ok().map(|u| u.to_string())
        };
        if let Some(abs) = absolute {
            if seen.insert(abs.clone()) {
                out.push(abs);
            }
        }
    }
    out
}

/// Disallowed path patterns from a robots.txt body. User-agent groups are
/// not distinguished.
pub fn parse_robots(body: &str) -> Vec<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = RE.get_or_init(|| Regex::new(r"(?i)^disallow:\s*(.[^ #]*)").ok()) else { return Vec::new() };
    body.lines()
        .filter_map(|line| re.captures(line).map(|c| c[1].trim_end().to_string()))
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["example.net".to_string()]
    }

    #[test]
    fn resolves_relative_and_absolute_links() {
        let html = r#"<html><a href="/about">a</a> <A HREF='contact.html'>c</A>
            <img class="x" src="//cdn.example.net/logo.png"> <script src="https://other.org/x.js"></script>
            <form method="post" action="../login?next=1&amp;x=2"></form></html>"#;
        let links = parse_links("https://www.example.net/dir/page.html", html, &names());
        assert_eq!(
            links,
            vec![
                "https://www.example.net/about",
                "https://www.example.net/dir/contact.html",
                "https://cdn.example.net/logo.png",
                "https://other.org/x.js",
                "https://www.example.net/login?next=1&x=2",
            ]
        );
    }

    #[test]
    fn drops_unlikely_links() {
        let html = r##"<a href="javascript:void(0)">j</a><a href="#top">t</a><a href="mailto:a@example.net">m</a>
            <a href="+foo">p</a><a href="next.">d</a><a href="go()">f</a><a href="">e</a>"##;
        assert!(parse_links("http://example.net/", html, &names()).is_empty());
    }

    #[test]
    fn bare_domain_mentions_become_links() {
        let html = r#"<a href="mail.example.net/inbox">x</a><a href="%2Fencoded%2Fpath">y</a>"#;
        let links = parse_links("http://example.net/", html, &names());
        assert_eq!(links, vec!["http://mail.example.net/inbox", "http://example.net/encoded/path"]);
    }

    #[test]
    fn robots_disallow_lines() {
        let body = "User-agent: *\nDisallow: /private # hidden\ndisallow:/tmp\nAllow: /public\nDisallow:\n";
        assert_eq!(parse_robots(body), vec!["/private", "/tmp"]);
    }
}

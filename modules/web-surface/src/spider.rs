//! Breadth-first crawl of target web sites, level by level, up to a page
//! and depth budget per starting point.

use spiderfoot_core::domain::{url_base_url, url_fqdn};
use spiderfoot_core::plugin::{merge_opts, str_list};
use spiderfoot_core::{Event, FetchRequest, FetchResponse, OptMap, OptMapExt, Plugin, PluginContext, PluginError, PluginMeta};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::links::{parse_links, parse_robots};

pub const NAME: &str = "sfp_spider";

const PAGE_SIZE_LIMIT: u64 = 10_000_000;

const FILTERED_EXTENSIONS: &[&str] = &[
    "png", "gif", "jpg", "jpeg", "tiff", "tif", "tar", "pdf", "ico", "flv", "mp4", "mp3", "avi", "mpg", "gz", "mpeg",
    "iso", "dat", "mov", "swf", "rar", "exe", "zip", "bin", "bz2", "xsl", "doc", "docx", "ppt", "pptx", "xls", "xlsx",
    "csv",
];

#[derive(Default)]
pub struct SfpSpider {
    ctx: Option<PluginContext>,
    opts: OptMap,
    /// Disallow patterns per site base URL.
    robots: HashMap<String, Vec<String>>,
    fetched: HashSet<String>,
    /// The event that announced each URL; content found there hangs off it.
    url_events: HashMap<String, Arc<Event>>,
    /// Last Set-Cookie value per host.
    cookies: HashMap<String, String>,
}

/// `name=value` pairs of a Set-Cookie header, attributes dropped.
fn cookie_pairs(set_cookie: &str) -> BTreeMap<String, String> {
    set_cookie
        .split([',', '\n'])
        .filter_map(|c| c.split(';').next())
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty() && !k.contains(' '))
        .collect()
}

impl SfpSpider {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::<SfpSpider>::default()
    }

    fn context(&self) -> Result<PluginContext, PluginError> {
        self.ctx.clone().ok_or_else(|| PluginError::Internal("not set up".into()))
    }

    fn filtered(&self, url: &str) -> bool {
        let path = url.to_lowercase();
        let path = path.split('?').next().unwrap_or_default();
        self.opts
            .opt_list("filterfiles")
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext.to_lowercase())))
    }

    fn notify(ctx: &PluginContext, event_type: &str, data: &str, url: &str, parent: &Arc<Event>) -> Result<(), PluginError> {
        ctx.notify_listeners(Event::new(event_type, data, NAME, parent)?.with_actual_source(url));
        Ok(())
    }

    fn content_notify(&self, ctx: &PluginContext, url: &str, resp: &FetchResponse, parent: &Arc<Event>) -> Result<(), PluginError> {
        Self::notify(ctx, "HTTP_CODE", &resp.code, url, parent)?;

        let mut store_content = true;
        if !resp.headers.is_empty() {
            let json = serde_json::to_string(&resp.headers).map_err(|e| PluginError::Internal(e.to_string()))?;
            Self::notify(ctx, "WEBSERVER_HTTPHEADERS", &json, url, parent)?;
            if let Some(ctype) = resp.headers.get("content-type").filter(|c| !c.is_empty()) {
                if self.opts.opt_list("filtermime").iter().any(|mt| ctype.starts_with(mt.as_str())) {
                    store_content = false;
                }
                Self::notify(ctx, "TARGET_WEB_CONTENT_TYPE", ctype, url, parent)?;
            }
        }

        if store_content {
            if let Some(content) = resp.content.as_deref().filter(|c| !c.is_empty()) {
                Self::notify(ctx, "TARGET_WEB_CONTENT", content, url, parent)?;
            }
        }
        Ok(())
    }

    fn link_notify(ctx: &PluginContext, url: &str, parent: &Arc<Event>) -> Result<Arc<Event>, PluginError> {
        let internal = url_fqdn(url).is_some_and(|host| ctx.target_matches(&host, false, true));
        let utype = if internal { "LINKED_URL_INTERNAL" } else { "LINKED_URL_EXTERNAL" };
        let evt = Event::new(utype, url, NAME, parent)?;
        ctx.notify_listeners(evt.clone());
        Ok(Arc::new(evt))
    }

    /// Fetch one page, report what came back and every link on it.
    /// Returns the links, or `None` when the page yielded nothing to follow.
    fn process_url(&mut self, ctx: &PluginContext, url: &str, origin: &Arc<Event>) -> Result<Option<Vec<String>>, PluginError> {
        if self.filtered(url) {
            return Ok(None);
        }
        let site = url_fqdn(url).unwrap_or_default();

        let mut req = FetchRequest::get(url);
        req.verify = false;
        req.size_limit = Some(PAGE_SIZE_LIMIT);
        if let Some(c) = self.cookies.get(&site) {
            ctx.debug(&format!("Restoring cookies for {site}: {c}"));
            req.cookies = cookie_pairs(c);
        }
        let resp = ctx.services().fetch(&req);
        self.fetched.insert(url.to_string());

        if self.opts.opt_bool("usecookies", true) {
            if let Some(c) = resp.headers.get("set-cookie") {
                ctx.debug(&format!("Saving cookies for {site}: {c}"));
                self.cookies.insert(site, c.clone());
            }
        }

        let parent = match self.url_events.get(url) {
            Some(e) => e.clone(),
            None => {
                ctx.error(&format!("No announcing event for {url}"));
                origin.clone()
            }
        };
        if resp.content.is_some() || !resp.headers.is_empty() {
            self.content_notify(ctx, url, &resp, &parent)?;
        }

        let (page, page_event) = if !resp.real_url.is_empty() && resp.real_url != url {
            // Redirect target: count it as fetched so it is not requested again.
            self.fetched.insert(resp.real_url.clone());
            let ev = Self::link_notify(ctx, &resp.real_url, &parent)?;
            self.url_events.insert(resp.real_url.clone(), ev.clone());
            (resp.real_url.clone(), ev)
        } else {
            (url.to_string(), parent)
        };

        let links = parse_links(&page, resp.content.as_deref().unwrap_or_default(), &ctx.target().names());
        if links.is_empty() {
            ctx.debug(&format!("No links found at {page}"));
            return Ok(None);
        }

        let report_all = self.opts.opt_bool("reportduplicates", false);
        for link in &links {
            if !report_all && self.url_events.contains_key(link) {
                continue;
            }
            let ev = Self::link_notify(ctx, link, &page_event)?;
            self.url_events.insert(link.clone(), ev);
        }
        ctx.debug(&format!("Links found from parsing: {}", links.join(", ")));
        Ok(Some(links))
    }

    /// Links worth following: on the target, not user folders, not
    /// disallowed by robots.txt when that is honoured.
    fn clean_links(&self, ctx: &PluginContext, links: Vec<String>) -> Vec<String> {
        let target = ctx.target();
        let nosubs = self.opts.opt_bool("nosubs", false);
        let filter_users = self.opts.opt_bool("filterusers", true);
        let robots_only = self.opts.opt_bool("robotsonly", false);

        links
            .into_iter()
            .filter(|link| {
                let fqdn = url_fqdn(link).unwrap_or_default();
                if !target.matches(&fqdn, false, true) {
                    return false;
                }
                if nosubs && !target.matches(&fqdn, false, false) {
                    return false;
                }
                if filter_users && link.contains("/~") {
                    return false;
                }
                if robots_only {
                    let lower = link.to_lowercase();
                    let blocked = url_base_url(link)
                        .and_then(|base| self.robots.get(&base))
                        .is_some_and(|rules| rules.iter().any(|b| b == "*" || lower.contains(&b.to_lowercase())));
                    if blocked {
                        return false;
                    }
                }
                ctx.debug(&format!("Adding URL for spidering: {link}"));
                true
            })
            .collect()
    }

    fn spider_from(&mut self, ctx: &PluginContext, start: &str, origin: &Arc<Event>) -> Result<(), PluginError> {
        let max_pages = self.opts.opt_i64("maxpages", 100).max(0) as usize;
        let max_levels = self.opts.opt_i64("maxlevels", 3).max(0) as usize;
        let pause = Duration::from_secs(self.opts.opt_i64("pausesec", 0).max(0) as u64);

        if self.opts.opt_bool("robotsonly", false) {
            if let Some(base) = url_base_url(start).filter(|b| !self.robots.contains_key(b)) {
                let mut req = FetchRequest::get(format!("{base}/robots.txt"));
                req.verify = false;
                if let Some(body) = ctx.services().fetch(&req).content {
                    ctx.debug(&format!("robots.txt contents: {body}"));
                    self.robots.insert(base, parse_robots(&body));
                }
            }
        }

        if ctx.check_for_stop() {
            return Ok(());
        }
        let Some(mut links) = self.process_url(ctx, start, origin)? else {
            ctx.debug("No links found on the first fetch!");
            return Ok(());
        };

        let mut next: Vec<String> = Vec::new();
        let mut total = 0usize;
        let mut levels = 0usize;
        let mut keep_going = true;
        while keep_going {
            if !next.is_empty() {
                links = Vec::new();
                for link in &next {
                    if self.fetched.contains(link) {
                        ctx.debug(&format!("Already fetched {link}, skipping."));
                        continue;
                    }
                    if ctx.check_for_stop() {
                        return Ok(());
                    }
                    ctx.debug(&format!("Fetching fresh content from: {link}"));
                    if !pause.is_zero() {
                        std::thread::sleep(pause);
                    }
                    if let Some(fresh) = self.process_url(ctx, link, origin)? {
                        for l in fresh {
                            if !links.contains(&l) {
                                links.push(l);
                            }
                        }
                    }
                    total += 1;
                    if total >= max_pages {
                        ctx.info(&format!("Maximum number of pages ({max_pages}) reached."));
                        keep_going = false;
                        break;
                    }
                }
            }

            next = self.clean_links(ctx, std::mem::take(&mut links));
            levels += 1;
            ctx.debug(&format!("At level: {levels}, Pages: {total}"));
            if levels >= max_levels {
                ctx.info(&format!("Maximum number of levels ({max_levels}) reached."));
                keep_going = false;
            }
            if next.is_empty() {
                ctx.debug("No more links found to spider, finishing..");
                keep_going = false;
            }
            if ctx.check_for_stop() {
                keep_going = false;
            }
        }
        Ok(())
    }
}

impl Plugin for SfpSpider {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: NAME,
            summary: "Spidering of web-pages to extract content for searching.",
            flags: &["slow"],
            use_cases: &["Footprint", "Investigate"],
            categories: &["Crawling and Scanning"],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        let mut o = OptMap::new();
        o.insert("robotsonly".into(), false.into());
        o.insert("pausesec".into(), 0.into());
        o.insert("maxpages".into(), 100.into());
        o.insert("maxlevels".into(), 3.into());
        o.insert("usecookies".into(), true.into());
        o.insert("start".into(), str_list(&["http://", "https://"]).into());
        o.insert("filterfiles".into(), str_list(FILTERED_EXTENSIONS).into());
        o.insert("filtermime".into(), str_list(&["image/"]).into());
        o.insert("filterusers".into(), true.into());
        o.insert("nosubs".into(), false.into());
        o.insert("reportduplicates".into(), false.into());
        o
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        [
            ("robotsonly", "Only follow links specified by robots.txt?"),
            ("usecookies", "Accept and use cookies?"),
            ("pausesec", "Number of seconds to pause between page fetches."),
            ("start", "Prepend targets with these until you get a hit, to start spidering."),
            ("maxpages", "Maximum number of pages to fetch per starting point identified."),
            ("maxlevels", "Maximum levels to traverse per starting point (e.g. hostname or link identified by another module) identified."),
            ("filterfiles", "File extensions to ignore (don't fetch them.)"),
            ("filtermime", "MIME types to ignore."),
            ("filterusers", "Skip spidering of /~user directories?"),
            ("nosubs", "Skip spidering of subdomains of the target?"),
            ("reportduplicates", "Report links every time one is found, even if found before?"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&["LINKED_URL_INTERNAL", "INTERNET_NAME"])
    }

    fn produced_events(&self) -> Vec<String> {
        str_list(&[
            "WEBSERVER_HTTPHEADERS",
            "HTTP_CODE",
            "LINKED_URL_INTERNAL",
            "LINKED_URL_EXTERNAL",
            "TARGET_WEB_CONTENT",
            "TARGET_WEB_CONTENT_TYPE",
        ])
    }

    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.opts = merge_opts(&self.opts(), user_opts);
        self.clear_listeners();
        self.ctx = Some(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        let ctx = self.context()?;
        ctx.debug(&format!("Received event, {}, from {}", event.event_type(), event.module()));

        if event.module() == NAME {
            ctx.debug(&format!("Ignoring {}, from self.", event.event_type()));
            return Ok(());
        }
        let data = event.data();
        if self.url_events.contains_key(data) {
            ctx.debug(&format!("Ignoring {data} as already spidered or is being spidered."));
            return Ok(());
        }
        self.url_events.insert(data.to_string(), event.clone());

        let start = if event.event_type() == "INTERNET_NAME" {
            let mut found = None;
            for prefix in self.opts.opt_list("start") {
                let candidate = format!("{prefix}{data}");
                let mut req = FetchRequest::get(candidate.as_str());
                req.verify = false;
                if ctx.services().fetch(&req).content.is_some() {
                    let evt = Self::link_notify(&ctx, &candidate, event)?;
                    self.url_events.insert(candidate.clone(), evt);
                    found = Some(candidate);
                    break;
                }
            }
            found
        } else {
            Some(data.to_string())
        };

        let Some(start) = start else { return Ok(()) };
        ctx.debug(&format!("Initiating spider of {start} from {}", event.module()));
        self.spider_from(&ctx, &start, event)
    }

    fn clear_listeners(&mut self) {
        self.robots.clear();
        self.fetched.clear();
        self.url_events.clear();
        self.cookies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiderfoot_core::testing::{plugin_context, seeded_event, CollectingSink, FakeServices};
    use spiderfoot_core::{Target, TargetType};

    fn plugin(services: FakeServices, opts: OptMap) -> (SfpSpider, Arc<CollectingSink>, Arc<FakeServices>) {
        let sink = Arc::new(CollectingSink::default());
        let services = Arc::new(services);
        let target = Target::new("example.net", TargetType::InternetName).unwrap();
        let ctx = plugin_context(NAME, target, services.clone(), sink.clone());
        let mut p = SfpSpider::default();
        p.setup(ctx, &opts).unwrap();
        (p, sink, services)
    }

    fn site() -> FakeServices {
        let s = FakeServices::new();
        s.page(
            "https://www.example.net",
            "200",
            r#"<a href="/a">a</a> <a href="https://other.org/">o</a> <img src="/logo.png">"#,
            &[("Content-Type", "text/html"), ("Server", "nginx")],
        );
        s.page("https://www.example.net/a", "200", r#"<a href="/b">b</a><a href="/~bob/">u</a>"#, &[]);
        s.page("https://www.example.net/b", "200", r#"<a href="/c">c</a>"#, &[]);
        s.page("https://www.example.net/c", "200", "end", &[]);
        s
    }

    #[test]
    fn crawls_within_level_budget() {
        let (mut p, sink, services) = plugin(site(), OptMap::new());
        p.handle_event(&seeded_event("example.net", "LINKED_URL_INTERNAL", "https://www.example.net")).unwrap();

        let fetched = services.fetched();
        assert_eq!(fetched, vec!["https://www.example.net", "https://www.example.net/a", "https://www.example.net/b"]);
        let internal = sink.of_type("LINKED_URL_INTERNAL");
        assert!(internal.contains(&"https://www.example.net/c".to_string()));
        assert!(internal.contains(&"https://www.example.net/~bob/".to_string()));
        assert_eq!(sink.of_type("LINKED_URL_EXTERNAL"), vec!["https://other.org/"]);
        assert_eq!(sink.of_type("TARGET_WEB_CONTENT_TYPE"), vec!["text/html"]);
        assert_eq!(sink.of_type("HTTP_CODE").len(), 3);
    }

    #[test]
    fn content_events_carry_the_page_url() {
        let (mut p, sink, _) = plugin(site(), OptMap::new());
        p.handle_event(&seeded_event("example.net", "LINKED_URL_INTERNAL", "https://www.example.net")).unwrap();
        let events = sink.events.lock();
        let headers = events
            .iter()
            .find(|e| e.event_type() == "WEBSERVER_HTTPHEADERS")
            .expect("headers reported");
        assert_eq!(headers.actual_source(), Some("https://www.example.net"));
        let parsed: serde_json::Value = serde_json::from_str(headers.data()).unwrap();
        assert_eq!(parsed["server"], "nginx");
    }

    #[test]
    fn internet_name_starts_from_first_answering_prefix() {
        let (mut p, sink, services) = plugin(site(), OptMap::new());
        p.handle_event(&seeded_event("example.net", "INTERNET_NAME", "www.example.net")).unwrap();
        assert_eq!(services.fetched()[..2], ["http://www.example.net".to_string(), "https://www.example.net".to_string()]);
        assert_eq!(sink.of_type("LINKED_URL_INTERNAL")[0], "https://www.example.net");
    }

    #[test]
    fn page_budget_and_robots() {
        let mut opts = OptMap::new();
        opts.insert("maxpages".into(), 1.into());
        let (mut p, _, services) = plugin(site(), opts);
        p.handle_event(&seeded_event("example.net", "LINKED_URL_INTERNAL", "https://www.example.net")).unwrap();
        assert_eq!(services.fetched().len(), 2);

        let s = site();
        s.page("https://www.example.net/robots.txt", "200", "User-agent: *\nDisallow: /a\n", &[]);
        let mut opts = OptMap::new();
        opts.insert("robotsonly".into(), true.into());
        let (mut p, _, services) = plugin(s, opts);
        p.handle_event(&seeded_event("example.net", "LINKED_URL_INTERNAL", "https://www.example.net")).unwrap();
        assert_eq!(services.fetched(), vec!["https://www.example.net/robots.txt", "https://www.example.net"]);
    }

    #[test]
    fn own_links_and_repeats_are_ignored() {
        let (mut p, sink, services) = plugin(site(), OptMap::new());
        let root = Arc::new(Event::root("example.net").unwrap());
        let own = Arc::new(Event::new("LINKED_URL_INTERNAL", "https://www.example.net/c", NAME, &root).unwrap());
        p.handle_event(&own).unwrap();
        assert!(services.fetched().is_empty());

        let ev = seeded_event("example.net", "LINKED_URL_INTERNAL", "https://www.example.net/c");
        p.handle_event(&ev).unwrap();
        p.handle_event(&ev).unwrap();
        assert_eq!(services.fetched(), vec!["https://www.example.net/c"]);
        assert_eq!(sink.of_type("TARGET_WEB_CONTENT"), vec!["end"]);
    }

    #[test]
    fn cookies_are_split_from_attributes() {
        let c = cookie_pairs("PHPSESSID=abc; path=/; HttpOnly");
        assert_eq!(c.get("PHPSESSID").map(String::as_str), Some("abc"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn describes_itself() {
        let p = SfpSpider::default();
        assert_eq!(p.opts().keys().collect::<Vec<_>>(), p.optdescs().keys().collect::<Vec<_>>());
        assert!(p.produced_events().iter().all(|t| spiderfoot_core::event_types::is_known(t)));
    }
}

//! Server banners, technologies and linked URLs read from the HTTP
//! headers the spider reports.

use serde_json::{Map, Value};
use spiderfoot_core::domain::url_fqdn;
use spiderfoot_core::plugin::{merge_opts, str_list};
use spiderfoot_core::{Event, OptMap, Plugin, PluginContext, PluginError, PluginMeta};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const NAME: &str = "sfp_webserver";

#[derive(Default)]
pub struct SfpWebserver {
    ctx: Option<PluginContext>,
    opts: OptMap,
    /// Pages whose headers were already examined.
    pages: HashSet<String>,
}

/// Server-side technology implied by session cookies, overridden by the
/// page extension when one is recognised.
pub fn technology(headers: &Map<String, Value>, page: &str) -> Option<&'static str> {
    let cookie = headers.get("set-cookie").and_then(Value::as_str).unwrap_or_default();
    let mut tech = None;
    if cookie.contains("PHPSESS") {
        tech = Some("PHP");
    }
    if cookie.contains("JSESSIONID") {
        tech = Some("Java/JSP");
    }
    if cookie.contains("ASP.NET") || headers.contains_key("x-aspnet-version") {
        tech = Some("ASP.NET");
    }
    if tech.is_some() && page.contains(".jsp") {
        tech = Some("Java/JSP");
    }
    if tech.is_some() && page.contains(".php") {
        tech = Some("PHP");
    }
    tech
}

impl SfpWebserver {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::<SfpWebserver>::default()
    }

    fn link(ctx: &PluginContext, url: &str, parent: &Arc<Event>) -> Result<(), PluginError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Ok(());
        }
        let internal = url_fqdn(url).is_some_and(|h| ctx.target_matches(&h, false, true));
        let t = if internal { "LINKED_URL_INTERNAL" } else { "LINKED_URL_EXTERNAL" };
        ctx.notify_listeners(Event::new(t, url, NAME, parent)?);
        Ok(())
    }
}

impl Plugin for SfpWebserver {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: NAME,
            summary: "Obtain web server banners to identify versions of web servers being used.",
            flags: &[],
            use_cases: &["Footprint", "Investigate", "Passive"],
            categories: &["Content Analysis"],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        OptMap::new()
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&["WEBSERVER_HTTPHEADERS"])
    }

    fn produced_events(&self) -> Vec<String> {
        str_list(&["WEBSERVER_BANNER", "WEBSERVER_TECHNOLOGY", "LINKED_URL_INTERNAL", "LINKED_URL_EXTERNAL"])
    }

    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.opts = merge_opts(&self.opts(), user_opts);
        self.pages.clear();
        self.ctx = Some(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        let ctx = self.ctx.as_ref().ok_or_else(|| PluginError::Internal("not set up".into()))?;
        ctx.debug(&format!("Received event, {}, from {}", event.event_type(), event.module()));

        // Findings hang off the page the headers came from.
        let Some(parent) = event.source() else { return Ok(()) };
        let page = parent.data();
        if !self.pages.insert(page.to_string()) {
            return Ok(());
        }
        if !url_fqdn(page).is_some_and(|h| ctx.target_matches(&h, false, true)) {
            ctx.debug("Not collecting web server information for external sites.");
            return Ok(());
        }

        let headers = match serde_json::from_str::<Value>(event.data()) {
            Ok(Value::Object(m)) => m,
            _ => return Err(PluginError::Data("HTTP headers in an unexpected format".into())),
        };
        let header = |k: &str| headers.get(k).and_then(Value::as_str);

        if let Some(location) = header("location") {
            Self::link(ctx, location, parent)?;
        }
        if let Some(csp) = header("content-security-policy") {
            for source in csp.split(';').flat_map(|d| d.split(' ')) {
                Self::link(ctx, source, parent)?;
            }
        }
        if let Some(server) = header("server") {
            ctx.notify_listeners(Event::new("WEBSERVER_BANNER", server, NAME, parent)?);
            ctx.info(&format!("Found web server: {server} ({page})"));
        }
        if let Some(powered) = header("x-powered-by") {
            ctx.notify_listeners(Event::new("WEBSERVER_TECHNOLOGY", powered, NAME, parent)?);
            return Ok(());
        }
        if let Some(tech) = technology(&headers, page) {
            ctx.notify_listeners(Event::new("WEBSERVER_TECHNOLOGY", tech, NAME, parent)?);
        }
        Ok(())
    }
}

//! Error strings in target web content: SQL, PHP and server errors.

use regex::{Regex, RegexBuilder};
use spiderfoot_core::domain::url_fqdn;
use spiderfoot_core::plugin::{merge_opts, str_list};
use spiderfoot_core::{Event, OptMap, Plugin, PluginContext, PluginError, PluginMeta, PluginRegistry};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

pub const NAME: &str = "sfp_errors";

/// Error families and the patterns that identify them, most of them from
/// well-known search engine dorks.
const GROUPS: &[(&str, &[&str])] = &[
    ("PHP Error", &["PHP pase error", "PHP warning", "PHP error", "unexpected T_VARIABLE", "warning: failed opening", "include_path="]),
    ("Generic Error", &["Internal Server Error", "Incorrect syntax"]),
    ("Oracle Error", &[r"ORA-\d+", "TNS:.?no listen"]),
    ("ASP Error", &["NET_SessionId"]),
    ("MySQL Error", &[r"mysql_query\(", r"mysql_connect\("]),
    ("ODBC Error", &[r"\[ODBC SQL"]),
];

fn compiled() -> &'static [(&'static str, Vec<Regex>)] {
    static RES: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    RES.get_or_init(|| {
        GROUPS
            .iter()
            .map(|(group, pats)| {
                let res = pats
                    .iter()
                    .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
                    .collect();
                (*group, res)
            })
            .collect()
    })
}

/// Error families found in `content`, in declaration order.
pub fn error_groups(content: &str) -> Vec<&'static str> {
    compiled()
        .iter()
        .filter(|(_, res)| res.iter().any(|re| re.is_match(content)))
        .map(|(g, _)| *g)
        .collect()
}

#[derive(Default)]
pub struct SfpErrors {
    ctx: Option<PluginContext>,
    opts: OptMap,
    /// Groups already reported per page.
    reported: HashMap<String, HashSet<&'static str>>,
}

impl SfpErrors {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::<SfpErrors>::default()
    }
}

impl Plugin for SfpErrors {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: NAME,
            summary: "Identify common error messages in content like SQL errors, etc.",
            flags: &[],
            use_cases: &["Footprint", "Passive"],
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
        str_list(&["TARGET_WEB_CONTENT"])
    }

    fn produced_events(&self) -> Vec<String> {
        str_list(&["ERROR_MESSAGE"])
    }

    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.opts = merge_opts(&self.opts(), user_opts);
        self.reported.clear();
        self.ctx = Some(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        let ctx = self.ctx.as_ref().ok_or_else(|| PluginError::Internal("not set up".into()))?;
        ctx.debug(&format!("Received event, {}, from {}", event.event_type(), event.module()));

        let page = match event.actual_source() {
            Some(url) => url.to_string(),
            None => event.source().map(|s| s.data().to_string()).unwrap_or_default(),
        };
        let in_target = url_fqdn(&page).is_some_and(|host| ctx.target_matches(&host, false, true));
        if !in_target {
            ctx.debug("Not collecting web content information for external sites.");
            return Ok(());
        }

        let seen = self.reported.entry(page.clone()).or_default();
        for group in error_groups(event.data()) {
            if !seen.insert(group) {
                continue;
            }
            ctx.info(&format!("Matched {group} in content from {page}"));
            ctx.notify_listeners(Event::new("ERROR_MESSAGE", group, NAME, event)?);
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) {
    registry.register(SfpErrors::boxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiderfoot_core::testing::{plugin_context, CollectingSink, FakeServices};
    use spiderfoot_core::{Target, TargetType};

    fn content(url: &str, body: &str) -> Arc<Event> {
        let root = Arc::new(Event::root("example.net").unwrap());
        let link = Arc::new(Event::new("LINKED_URL_INTERNAL", url, "sfp_spider", &root).unwrap());
        Arc::new(Event::new("TARGET_WEB_CONTENT", body, "sfp_spider", &link).unwrap().with_actual_source(url))
    }

    fn plugin() -> (SfpErrors, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let target = Target::new("example.net", TargetType::InternetName).unwrap();
        let ctx = plugin_context(NAME, target, Arc::new(FakeServices::new()), sink.clone());
        let mut p = SfpErrors::default();
        p.setup(ctx, &OptMap::new()).unwrap();
        (p, sink)
    }

    #[test]
    fn detects_groups() {
        assert_eq!(error_groups("ORA-00933: SQL command not properly ended"), vec!["Oracle Error"]);
        assert_eq!(error_groups("Warning: mysql_connect(): PHP Warning"), vec!["PHP Error", "MySQL Error"]);
        assert!(error_groups("all good").is_empty());
    }

    #[test]
    fn reports_each_group_once_per_page() {
        let (mut p, sink) = plugin();
        p.handle_event(&content("https://www.example.net/a", "Internal Server Error")).unwrap();
        p.handle_event(&content("https://www.example.net/a", "internal server error again")).unwrap();
        p.handle_event(&content("https://www.example.net/b", "Internal Server Error")).unwrap();
        assert_eq!(sink.of_type("ERROR_MESSAGE"), vec!["Generic Error", "Generic Error"]);
    }

    #[test]
    fn ignores_pages_outside_the_target() {
        let (mut p, sink) = plugin();
        p.handle_event(&content("https://other.org/x", "PHP error")).unwrap();
        assert!(sink.emitted().is_empty());
    }

    #[test]
    fn describes_itself() {
        let p = SfpErrors::default();
        assert_eq!(p.opts().keys().collect::<Vec<_>>(), p.optdescs().keys().collect::<Vec<_>>());
        assert!(p.produced_events().iter().all(|t| spiderfoot_core::event_types::is_known(t)));
    }
}

//! The contract every collector implements, plus the handle the engine
//! injects into each plugin instance.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::OptMap;
use crate::event::Event;
use crate::scanlog::{LogLevel, ScanLog};
use crate::services::Services;
use crate::target::Target;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DataSource {
    pub website: &'static str,
    pub model: &'static str,
    pub references: &'static [&'static str],
    pub api_key_instructions: &'static [&'static str],
}

/// Static description of a plugin, used for module selection.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PluginMeta {
    pub name: &'static str,
    pub summary: &'static str,
    pub flags: &'static [&'static str],
    pub use_cases: &'static [&'static str],
    pub categories: &'static [&'static str],
    pub data_source: Option<DataSource>,
}

#[derive(Debug, Error)]
pub enum PluginError {
    /// Missing or invalid option, e.g. an absent API key.
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("remote error (transient={transient}): {message}")]
    Remote { message: String, transient: bool },
    /// The remote side refused us (401/403).
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("bad data: {0}")]
    Data(String),
    #[error("invalid event: {0}")]
    Event(#[from] crate::error::Error),
    #[error("{0}")]
    Internal(String),
}

impl PluginError {
    /// Errors after which the plugin should receive no further events.
    pub fn disables_plugin(&self) -> bool {
        matches!(self, PluginError::Configuration(_) | PluginError::Rejected(_))
    }
}

/// Where plugins hand emitted events. Implemented by the scan's bus.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: Event, output_filter: &[String]);
}

/// Engine handle given to a plugin at setup.
#[derive(Clone)]
pub struct PluginContext {
    name: String,
    scan_id: String,
    target: Arc<RwLock<Target>>,
    services: Arc<dyn Services>,
    sink: Arc<dyn EventSink>,
    log: Arc<dyn ScanLog>,
    stop: Arc<AtomicBool>,
    errored: Arc<AtomicBool>,
    output_filter: Arc<RwLock<Vec<String>>>,
}

impl PluginContext {
    pub fn new(
        name: &str,
        scan_id: &str,
        target: Arc<RwLock<Target>>,
        services: Arc<dyn Services>,
        sink: Arc<dyn EventSink>,
        log: Arc<dyn ScanLog>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        PluginContext {
            name: name.to_string(),
            scan_id: scan_id.to_string(),
            target,
            services,
            sink,
            log,
            stop,
            errored: Arc::new(AtomicBool::new(false)),
            output_filter: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn scan_id(&self) -> &str { &self.scan_id }
    pub fn services(&self) -> &Arc<dyn Services> { &self.services }

    /// Snapshot of the target, including aliases learned so far.
    pub fn target(&self) -> Target {
        self.target.read().clone()
    }

    pub fn target_matches(&self, value: &str, include_parents: bool, include_children: bool) -> bool {
        self.target.read().matches(value, include_parents, include_children)
    }

    pub fn set_target_alias(&self, value: &str, alias_type: &str) {
        self.target.write().set_alias(value, alias_type);
    }

    pub fn notify_listeners(&self, event: Event) {
        let filter = self.output_filter.read().clone();
        self.sink.notify(event, &filter);
    }

    pub fn set_output_filter(&self, types: Vec<String>) {
        *self.output_filter.write() = types;
    }

    pub fn check_for_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_error_state(&self) {
        self.errored.store(true, Ordering::SeqCst);
    }

    pub fn error_state(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }

    pub fn debug(&self, msg: &str) {
        tracing::debug!(scan_id = %self.scan_id, module = %self.name, "{msg}");
        self.log.log(&self.name, LogLevel::Debug, msg);
    }

    pub fn info(&self, msg: &str) {
        tracing::info!(scan_id = %self.scan_id, module = %self.name, "{msg}");
        self.log.log(&self.name, LogLevel::Info, msg);
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(scan_id = %self.scan_id, module = %self.name, "{msg}");
        self.log.log(&self.name, LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: &str) {
        tracing::error!(scan_id = %self.scan_id, module = %self.name, "{msg}");
        self.log.log(&self.name, LogLevel::Error, msg);
    }
}

/// A collector. One instance serves one scan and receives at most one
/// event at a time, in the order its producers emitted them.
pub trait Plugin: Send {
    fn meta(&self) -> PluginMeta;

    /// Default options.
    fn opts(&self) -> OptMap;

    /// One description per key in [`Plugin::opts`].
    fn optdescs(&self) -> BTreeMap<String, String>;

    /// Event types this plugin wants; `"*"` means every type.
    fn watched_events(&self) -> Vec<String>;

    fn produced_events(&self) -> Vec<String>;

    /// Lower runs first when several listeners share an event.
    fn priority(&self) -> i32 {
        1
    }

    /// Called once per scan before any event is delivered.
    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError>;

    /// Add aliases to the target before the scan starts.
    fn enrich_target(&mut self, _target: &mut Target) {}

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError>;

    /// Reset per-run state.
    fn clear_listeners(&mut self) {}

    /// Called when the scan has gone quiet.
    fn finish(&mut self) {}
}

/// Defaults overlaid with user overrides; keys the plugin does not define
/// are dropped.
pub fn merge_opts(defaults: &OptMap, user: &OptMap) -> OptMap {
    let mut out = defaults.clone();
    for (k, v) in user {
        if out.contains_key(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

pub fn str_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_ignores_unknown_keys() {
        let mut d = OptMap::new();
        d.insert("a".into(), json!(1));
        let mut u = OptMap::new();
        u.insert("a".into(), json!(2));
        u.insert("b".into(), json!(3));
        let m = merge_opts(&d, &u);
        assert_eq!(m.len(), 1);
        assert_eq!(m["a"], json!(2));
    }

    #[test]
    fn disabling_errors() {
        assert!(PluginError::Rejected("403".into()).disables_plugin());
        assert!(!PluginError::Remote { message: "503".into(), transient: true }.disables_plugin());
    }
}

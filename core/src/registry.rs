//! Name-indexed table of available plugins.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::OptMap;
use crate::plugin::{Plugin, PluginMeta};

pub type PluginFactory = fn() -> Box<dyn Plugin>;

#[derive(Clone)]
pub struct PluginDescriptor {
    pub meta: PluginMeta,
    pub opts: OptMap,
    pub optdescs: BTreeMap<String, String>,
    pub watched: Vec<String>,
    pub produced: Vec<String>,
    pub factory: PluginFactory,
}

impl PluginDescriptor {
    /// Instantiates once to capture the plugin's static description.
    pub fn from_factory(factory: PluginFactory) -> Self {
        let p = factory();
        PluginDescriptor {
            meta: p.meta(),
            opts: p.opts(),
            optdescs: p.optdescs(),
            watched: p.watched_events(),
            produced: p.produced_events(),
            factory,
        }
    }

    pub fn name(&self) -> &'static str {
        self.meta.name
    }

    pub fn instantiate(&self) -> Box<dyn Plugin> {
        (self.factory)()
    }
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: PluginFactory) -> &mut Self {
        let d = PluginDescriptor::from_factory(factory);
        self.plugins.insert(d.name().to_string(), d);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins that may emit any of `types` (`"*"` selects all).
    pub fn modules_producing(&self, types: &[&str]) -> Vec<String> {
        let all = types.contains(&"*");
        self.plugins
            .values()
            .filter(|d| all || d.produced.iter().any(|p| types.contains(&p.as_str())))
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Plugins watching any of `types`, including wildcard watchers.
    pub fn modules_consuming(&self, types: &[&str]) -> Vec<String> {
        let all = types.contains(&"*");
        self.plugins
            .values()
            .filter(|d| all || d.watched.iter().any(|w| w == "*" || types.contains(&w.as_str())))
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Union of the types produced by the named plugins.
    pub fn events_from_modules(&self, names: &[&str]) -> BTreeSet<String> {
        names
            .iter()
            .filter_map(|n| self.plugins.get(*n))
            .flat_map(|d| d.produced.iter().cloned())
            .collect()
    }

    /// Union of the types watched by the named plugins.
    pub fn events_to_modules(&self, names: &[&str]) -> BTreeSet<String> {
        names
            .iter()
            .filter_map(|n| self.plugins.get(*n))
            .flat_map(|d| d.watched.iter().cloned())
            .collect()
    }
}

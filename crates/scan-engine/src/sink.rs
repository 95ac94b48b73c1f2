//! The built-in storage plugin. Persistence itself happens on the bus,
//! synchronously, so the plugin only contributes its options.

use results_sqlite::{SharedDb, StoreError};
use serde_json::json;
use spiderfoot_core::plugin::str_list;
use spiderfoot_core::{Event, OptMap, OptMapExt, Plugin, PluginContext, PluginError, PluginMeta};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const STORAGE_MODULE: &str = "sfp__stor_db";

#[derive(Default)]
pub struct StoragePlugin;

impl StoragePlugin {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::new(StoragePlugin)
    }
}

impl Plugin for StoragePlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: STORAGE_MODULE,
            summary: "Stores scan results into the back-end SpiderFoot database. You will need this.",
            flags: &[],
            use_cases: &[],
            categories: &[],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        OptMap::from([
            ("maxstorage".to_string(), json!(1024)),
            ("_store".to_string(), json!(true)),
        ])
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("maxstorage".to_string(), "Maximum bytes to store for any piece of information retrieved (0 = unlimited.)".to_string()),
            ("_store".to_string(), "Store scan results in the back-end database.".to_string()),
        ])
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&["*"])
    }

    fn produced_events(&self) -> Vec<String> {
        Vec::new()
    }

    fn setup(&mut self, _ctx: PluginContext, _user_opts: &OptMap) -> Result<(), PluginError> {
        Ok(())
    }

    fn handle_event(&mut self, _event: &Arc<Event>) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Write path used by the bus for every accepted event.
pub struct StorageSink {
    db: SharedDb,
    scan_id: String,
    truncate: usize,
    enabled: bool,
}

impl StorageSink {
    /// `opts` are the storage plugin's effective options.
    pub fn new(db: SharedDb, scan_id: &str, opts: &OptMap) -> Self {
        StorageSink {
            db,
            scan_id: scan_id.to_string(),
            truncate: opts.opt_i64("maxstorage", 1024).max(0) as usize,
            enabled: opts.opt_bool("_store", true),
        }
    }

    /// Returns whether a new row was written.
    pub fn store(&self, event: &Event) -> Result<bool, StoreError> {
        if !self.enabled {
            return Ok(false);
        }
        self.db.lock().scan_event_store(&self.scan_id, event, self.truncate)
    }
}

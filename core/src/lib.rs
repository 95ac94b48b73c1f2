//! Core types shared by the scan engine, storage and plugins.

pub mod config;
pub mod domain;
pub mod error;
pub mod event;
pub mod event_types;
pub mod plugin;
pub mod ratelimiter;
pub mod registry;
pub mod scanlog;
pub mod services;
pub mod status;
pub mod target;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod threadpool;

pub use config::{GlobalConfig, OptMap, OptMapExt};
pub use error::{Error, Result};
pub use event::{Event, EventRecord, ROOT_HASH, ROOT_TYPE};
pub use event_types::{EventKind, EventTypeInfo};
pub use plugin::{EventSink, Plugin, PluginContext, PluginError, PluginMeta};
pub use registry::{PluginDescriptor, PluginRegistry};
pub use scanlog::{LogLevel, ScanLog};
pub use services::{FetchRequest, FetchResponse, Services};
pub use status::ScanStatus;
pub use target::{target_type_from_string, Target, TargetType};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}

//! SQLite result store: scans, events, logs, configuration, correlations.

mod arrow_schemas;
mod error;
mod insert;
mod models;
mod open;
mod query;
mod schema;

pub mod export;
pub mod export_parquet;
pub mod graph;
pub mod logwriter;

pub use error::{Result, StoreError};
pub use logwriter::LogWriter;
pub use models::*;
pub use open::Db;

use std::sync::Arc;

/// Write handle shared by the bus and the controller.
pub type SharedDb = Arc<parking_lot::Mutex<Db>>;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Fresh scan id: the first group of a v4 UUID, upper-cased.
pub fn new_scan_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_ids_are_short_hex() {
        let id = new_scan_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(id, new_scan_id());
    }
}

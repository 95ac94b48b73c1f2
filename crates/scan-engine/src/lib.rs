//! Scan lifecycle: validation, plugin loading, event fan-out and final
//! status. One [`Scanner`] drives one scan.

mod bus;
mod scanner;
pub mod sink;

pub use scanner::{stop_scan, ScanDeps, ScanHandle, ScanRequest, Scanner, SEED_MODULE};
pub use sink::{StoragePlugin, STORAGE_MODULE};

use results_sqlite::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scan request: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Target(#[from] spiderfoot_core::Error),
    #[error("scan failed: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

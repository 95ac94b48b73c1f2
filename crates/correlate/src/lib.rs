//! Rule-driven correlation over a finished scan's stored events.

pub mod engine;
pub mod rule;

pub use engine::{Correlator, Item};
pub use rule::{bundled_rules, load_rules, Rule};

use results_sqlite::StoreError;
use spiderfoot_core::ScanStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("invalid correlation rule: {0}")]
    Syntax(String),
    #[error("scan {0} does not exist")]
    InvalidScan(String),
    #[error("scan {scan_id} is {status}; correlations cannot run on running scans")]
    ScanRunning { scan_id: String, status: ScanStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Status,
    Warn,
    Error,
}

impl LogLevel {
    /// Level as written to the scan log table. INFO is stored as STATUS.
    pub fn stored(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info | LogLevel::Status => "STATUS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Status => "STATUS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "STATUS" => Ok(LogLevel::Status),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(Error::Validation(format!("unknown log level: {other}"))),
        }
    }
}

/// Destination for scan-scoped log lines.
pub trait ScanLog: Send + Sync {
    fn log(&self, component: &str, level: LogLevel, message: &str);
}

/// Drops everything; used when `__logging` is off.
pub struct NullLog;

impl ScanLog for NullLog {
    fn log(&self, _component: &str, _level: LogLevel, _message: &str) {}
}

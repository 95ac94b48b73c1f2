use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Scan lifecycle. Terminal states are FINISHED, ABORTED and ERROR-FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "INITIALIZING")]
    Initializing,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "ABORT-REQUESTED")]
    AbortRequested,
    #[serde(rename = "ABORTED")]
    Aborted,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "ERROR-FAILED")]
    ErrorFailed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Created => "CREATED",
            ScanStatus::Initializing => "INITIALIZING",
            ScanStatus::Starting => "STARTING",
            ScanStatus::Started => "STARTED",
            ScanStatus::Running => "RUNNING",
            ScanStatus::AbortRequested => "ABORT-REQUESTED",
            ScanStatus::Aborted => "ABORTED",
            ScanStatus::Finished => "FINISHED",
            ScanStatus::ErrorFailed => "ERROR-FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Aborted | ScanStatus::Finished | ScanStatus::ErrorFailed)
    }

    /// States in which the scan is still producing events.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ScanStatus::Initializing
                | ScanStatus::Starting
                | ScanStatus::Started
                | ScanStatus::Running
                | ScanStatus::AbortRequested
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            ScanStatus::Created,
            ScanStatus::Initializing,
            ScanStatus::Starting,
            ScanStatus::Started,
            ScanStatus::Running,
            ScanStatus::AbortRequested,
            ScanStatus::Aborted,
            ScanStatus::Finished,
            ScanStatus::ErrorFailed,
        ];
        all.into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown scan status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_names() {
        assert_eq!("ABORT-REQUESTED".parse::<ScanStatus>().unwrap(), ScanStatus::AbortRequested);
        assert_eq!("ERROR-FAILED".parse::<ScanStatus>().unwrap(), ScanStatus::ErrorFailed);
        assert!("DONE".parse::<ScanStatus>().is_err());
        assert!(ScanStatus::Finished.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
    }
}

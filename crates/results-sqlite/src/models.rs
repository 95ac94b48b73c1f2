use serde::{Deserialize, Serialize};
use spiderfoot_core::LogLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInstance {
    pub guid: String,
    pub name: String,
    pub seed_target: String,
    pub seed_target_type: String,
    /// Milliseconds since the epoch; 0 when unset.
    pub created: i64,
    pub started: i64,
    pub ended: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanListRow {
    #[serde(flatten)]
    pub scan: ScanInstance,
    /// Stored events other than ROOT.
    pub result_count: i64,
}

/// One stored event joined with its parent and type metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub generated: f64,
    pub data: String,
    pub source_data: String,
    pub module: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub confidence: i64,
    pub visibility: i64,
    pub risk: i64,
    pub hash: String,
    pub source_hash: String,
    pub event_descr: String,
    pub event_kind: String,
    pub scan_id: String,
    pub false_positive: bool,
    pub parent_false_positive: bool,
}

/// Filters for [`crate::Db::scan_result_events`]. Empty lists match all.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub types: Vec<String>,
    pub modules: Vec<String>,
    pub values: Vec<String>,
    pub source_hashes: Vec<String>,
    pub hashes: Vec<String>,
    pub correlation_id: Option<String>,
    pub exclude_fp: bool,
}

impl EventQuery {
    pub fn of_type(t: &str) -> Self {
        EventQuery { types: vec![t.to_string()], ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryBy {
    Type,
    Module,
    Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub key: String,
    pub description: String,
    pub last_seen: i64,
    pub total: i64,
    pub unique: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueRow {
    pub data: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub generated: i64,
    pub component: String,
    pub level: String,
    pub message: String,
    pub rowid: i64,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub scan_id: String,
    pub component: String,
    pub level: LogLevel,
    pub message: String,
    pub generated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub bucket: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub count: i64,
}

/// At least two of the three criteria must be set.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub scan_id: Option<String>,
    pub event_type: Option<String>,
    /// Case-insensitive substring, glob with `*`, or a regex wrapped in
    /// `/.../`. Checked against both the event's data and its source's.
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeRow {
    pub event: String,
    pub description: String,
    pub raw: bool,
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct NewCorrelation {
    pub id: String,
    pub scan_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub rule_descr: String,
    pub rule_risk: String,
    pub rule_logic: String,
    pub title: String,
    pub event_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub id: String,
    pub title: String,
    pub rule_id: String,
    pub rule_risk: String,
    pub rule_name: String,
    pub rule_descr: String,
    pub rule_logic: String,
    pub event_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationSummaryBy {
    Risk,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummaryRow {
    pub key: String,
    pub name: String,
    pub risk: String,
    pub count: i64,
}

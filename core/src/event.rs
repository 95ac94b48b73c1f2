//! Typed observations and their provenance chain.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

pub const ROOT_TYPE: &str = "ROOT";
pub const ROOT_HASH: &str = "ROOT";

/// One emitted fact. Immutable once handed to the bus.
///
/// Every event except ROOT holds its parent, so a plugin can walk the
/// provenance chain in memory without touching storage.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: String,
    data: String,
    module: String,
    generated: f64,
    confidence: u8,
    visibility: u8,
    risk: u8,
    source: Option<Arc<Event>>,
    source_hash: String,
    hash: String,
    actual_source: Option<String>,
    module_data_source: Option<String>,
}

/// Flat, parent-free view of an event used for storage and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: String,
    pub module: String,
    pub generated: f64,
    pub confidence: u8,
    pub visibility: u8,
    pub risk: u8,
    pub hash: String,
    pub source_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_data_source: Option<String>,
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Content hash over `(type, data, module, source_hash)`.
///
/// Fields are length-prefixed so that no two distinct tuples share an
/// encoding.
pub fn event_hash(event_type: &str, data: &str, module: &str, source_hash: &str) -> String {
    let mut h = Sha256::new();
    for part in [event_type, data, module, source_hash] {
        h.update((part.len() as u64).to_le_bytes());
        h.update(part.as_bytes());
    }
    hex::encode(h.finalize())
}

fn check_score(name: &str, v: u8) -> Result<u8> {
    if v > 100 {
        return Err(Error::Validation(format!("{name} must be within 0..=100, got {v}")));
    }
    Ok(v)
}

impl Event {
    /// The synthetic first event of a scan, carrying the seed value.
    pub fn root(seed: &str) -> Result<Self> {
        if seed.is_empty() {
            return Err(Error::Validation("root event requires a seed value".into()));
        }
        Ok(Event {
            event_type: ROOT_TYPE.to_string(),
            data: seed.to_string(),
            module: String::new(),
            generated: now_secs(),
            confidence: 100,
            visibility: 100,
            risk: 0,
            source: None,
            source_hash: ROOT_HASH.to_string(),
            hash: ROOT_HASH.to_string(),
            actual_source: None,
            module_data_source: None,
        })
    }

    pub fn new(event_type: &str, data: impl Into<String>, module: &str, source: &Arc<Event>) -> Result<Self> {
        let data = data.into();
        if event_type.is_empty() {
            return Err(Error::Validation("event type is empty".into()));
        }
        if event_type == ROOT_TYPE {
            return Err(Error::Validation("ROOT events are created with Event::root".into()));
        }
        if data.is_empty() {
            return Err(Error::Validation(format!("{event_type} event from {module} has empty data")));
        }
        if module.is_empty() {
            return Err(Error::Validation(format!("{event_type} event has no module")));
        }
        let source_hash = source.hash.clone();
        let hash = event_hash(event_type, &data, module, &source_hash);
        Ok(Event {
            event_type: event_type.to_string(),
            data,
            module: module.to_string(),
            generated: now_secs(),
            confidence: 100,
            visibility: 100,
            risk: 0,
            source: Some(Arc::clone(source)),
            source_hash,
            hash,
            actual_source: None,
            module_data_source: None,
        })
    }

    pub fn with_confidence(mut self, v: u8) -> Result<Self> {
        self.confidence = check_score("confidence", v)?;
        Ok(self)
    }

    pub fn with_visibility(mut self, v: u8) -> Result<Self> {
        self.visibility = check_score("visibility", v)?;
        Ok(self)
    }

    pub fn with_risk(mut self, v: u8) -> Result<Self> {
        self.risk = check_score("risk", v)?;
        Ok(self)
    }

    pub fn with_actual_source(mut self, s: impl Into<String>) -> Self {
        self.actual_source = Some(s.into());
        self
    }

    pub fn with_module_data_source(mut self, s: impl Into<String>) -> Self {
        self.module_data_source = Some(s.into());
        self
    }

    pub fn event_type(&self) -> &str { &self.event_type }
    pub fn data(&self) -> &str { &self.data }
    pub fn module(&self) -> &str { &self.module }
    pub fn generated(&self) -> f64 { self.generated }
    pub fn confidence(&self) -> u8 { self.confidence }
    pub fn visibility(&self) -> u8 { self.visibility }
    pub fn risk(&self) -> u8 { self.risk }
    pub fn hash(&self) -> &str { &self.hash }
    pub fn source_hash(&self) -> &str { &self.source_hash }
    pub fn source(&self) -> Option<&Arc<Event>> { self.source.as_ref() }
    pub fn actual_source(&self) -> Option<&str> { self.actual_source.as_deref() }
    pub fn module_data_source(&self) -> Option<&str> { self.module_data_source.as_deref() }

    pub fn is_root(&self) -> bool {
        self.event_type == ROOT_TYPE
    }

    /// Parents from the immediate source up to ROOT.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: self.source.as_deref() }
    }

    /// True when some ancestor has the same type and, ignoring case, the
    /// same data. Such events are stored but not fanned out again.
    pub fn repeats_ancestor(&self) -> bool {
        self.ancestors()
            .any(|a| a.event_type == self.event_type && a.data.eq_ignore_ascii_case(&self.data))
    }

    pub fn as_record(&self) -> EventRecord {
        EventRecord {
            event_type: self.event_type.clone(),
            data: self.data.clone(),
            module: self.module.clone(),
            generated: self.generated,
            confidence: self.confidence,
            visibility: self.visibility,
            risk: self.risk,
            hash: self.hash.clone(),
            source_hash: self.source_hash.clone(),
            actual_source: self.actual_source.clone(),
            module_data_source: self.module_data_source.clone(),
        }
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a Event>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = cur.source.as_deref();
        Some(cur)
    }
}

impl EventRecord {
    /// Recompute the content hash from the stored fields.
    pub fn computed_hash(&self) -> String {
        if self.event_type == ROOT_TYPE {
            return ROOT_HASH.to_string();
        }
        event_hash(&self.event_type, &self.data, &self.module, &self.source_hash)
    }
}

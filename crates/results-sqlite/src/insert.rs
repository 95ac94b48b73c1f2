use crate::error::{Result, StoreError};
use crate::models::{LogEntry, NewCorrelation};
use crate::{now_ms, Db};
use rusqlite::params;
use spiderfoot_core::{event_types, Event, EventRecord, LogLevel, ScanStatus, ROOT_TYPE};
use std::collections::BTreeMap;

const GLOBAL_SCOPE: &str = "GLOBAL";

/// `plugin:opt` keys map to (plugin, opt); anything else is global.
pub(crate) fn split_scope(key: &str) -> (&str, &str) {
    match key.split_once(':') {
        Some((scope, opt)) if !scope.is_empty() => (scope, opt),
        _ => (GLOBAL_SCOPE, key),
    }
}

pub(crate) fn join_scope(scope: &str, opt: &str) -> String {
    if scope == GLOBAL_SCOPE {
        opt.to_string()
    } else {
        format!("{scope}:{opt}")
    }
}

fn clip(data: &str, truncate: usize) -> &str {
    if truncate == 0 {
        return data;
    }
    match data.char_indices().nth(truncate) {
        Some((idx, _)) => &data[..idx],
        None => data,
    }
}

impl Db {
    pub fn scan_instance_create(&self, id: &str, name: &str, seed: &str, seed_type: &str) -> Result<()> {
        if id.is_empty() || name.is_empty() || seed.is_empty() {
            return Err(StoreError::Validation("scan id, name and seed are required".into()));
        }
        self.conn.execute(
            "INSERT INTO tbl_scan_instance (guid, name, seed_target, seed_target_type, created, status) VALUES (?,?,?,?,?,?)",
            params![id, name, seed, seed_type, now_ms(), ScanStatus::Created.as_str()],
        )?;
        Ok(())
    }

    pub fn scan_instance_set(
        &self,
        id: &str,
        started: Option<i64>,
        ended: Option<i64>,
        status: Option<ScanStatus>,
    ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE tbl_scan_instance SET started = COALESCE(?, started), ended = COALESCE(?, ended), status = COALESCE(?, status) WHERE guid = ?",
            params![started, ended, status.map(|s| s.as_str()), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("scan {id}")));
        }
        Ok(())
    }

    /// Remove a scan and everything hanging off it in one transaction.
    pub fn scan_instance_delete(&self, id: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM tbl_scan_correlation_results_events WHERE correlation_id IN (SELECT id FROM tbl_scan_correlation_results WHERE scan_instance_id = ?)",
            [id],
        )?;
        tx.execute("DELETE FROM tbl_scan_correlation_results WHERE scan_instance_id = ?", [id])?;
        tx.execute("DELETE FROM tbl_scan_results WHERE scan_instance_id = ?", [id])?;
        tx.execute("DELETE FROM tbl_scan_log WHERE scan_instance_id = ?", [id])?;
        tx.execute("DELETE FROM tbl_scan_config WHERE scan_instance_id = ?", [id])?;
        tx.execute("DELETE FROM tbl_scan_instance WHERE guid = ?", [id])?;
        tx.commit()?;
        Ok(())
    }

    /// Store one event. Returns false when an event with the same hash is
    /// already stored for this scan. `truncate > 0` clips data to that many
    /// characters.
    pub fn scan_event_store(&self, scan_id: &str, event: &Event, truncate: usize) -> Result<bool> {
        self.scan_record_store(scan_id, &event.as_record(), truncate)
    }

    pub fn scan_record_store(&self, scan_id: &str, rec: &EventRecord, truncate: usize) -> Result<bool> {
        if rec.data.is_empty() {
            return Err(StoreError::Validation(format!("{} event has empty data", rec.event_type)));
        }
        if !self.event_type_known(&rec.event_type)? {
            return Err(StoreError::Validation(format!("unknown event type {}", rec.event_type)));
        }
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO tbl_scan_results \
             (scan_instance_id, hash, type, generated, confidence, visibility, risk, module, data, source_event_hash, actual_source, module_data_source) \
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
            params![
                scan_id,
                rec.hash,
                rec.event_type,
                rec.generated,
                rec.confidence,
                rec.visibility,
                rec.risk,
                rec.module,
                clip(&rec.data, truncate),
                rec.source_hash,
                rec.actual_source,
                rec.module_data_source,
            ],
        )?;
        Ok(n > 0)
    }

    fn event_type_known(&self, t: &str) -> Result<bool> {
        if event_types::is_known(t) {
            return Ok(true);
        }
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM tbl_event_types WHERE event = ?", [t], |r| r.get(0))?;
        Ok(n > 0)
    }

    /// Append one log line. Lock contention is retried once, then the line
    /// is dropped and `Ok(false)` returned.
    pub fn scan_log_event(&self, scan_id: &str, component: &str, level: LogLevel, message: &str) -> Result<bool> {
        let entry = LogEntry {
            scan_id: scan_id.to_string(),
            component: component.to_string(),
            level,
            message: message.to_string(),
            generated: now_ms(),
        };
        self.scan_log_events(std::slice::from_ref(&entry))
    }

    pub fn scan_log_events(&self, batch: &[LogEntry]) -> Result<bool> {
        for attempt in 0..2 {
            match self.try_log_batch(batch) {
                Ok(()) => return Ok(true),
                Err(e) if e.is_busy() && attempt == 0 => continue,
                Err(e) if e.is_busy() => {
                    tracing::warn!(entries = batch.len(), "dropping scan log batch: {e}");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    fn try_log_batch(&self, batch: &[LogEntry]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tbl_scan_log (scan_instance_id, generated, component, type, message) VALUES (?,?,?,?,?)",
            )?;
            for e in batch {
                stmt.execute(params![e.scan_id, e.generated, e.component, e.level.stored(), e.message])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn config_set(&self, opts: &BTreeMap<String, String>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("REPLACE INTO tbl_config (scope, opt, val) VALUES (?,?,?)")?;
            for (k, v) in opts {
                let (scope, opt) = split_scope(k);
                stmt.execute(params![scope, opt, v])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn config_clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM tbl_config", [])?;
        Ok(())
    }

    pub fn scan_config_set(&self, scan_id: &str, opts: &BTreeMap<String, String>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM tbl_scan_config WHERE scan_instance_id = ?", [scan_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tbl_scan_config (scan_instance_id, component, opt, val) VALUES (?,?,?,?)",
            )?;
            for (k, v) in opts {
                let (scope, opt) = split_scope(k);
                stmt.execute(params![scan_id, scope, opt, v])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Set or clear the false-positive flag. Returns rows changed.
    pub fn scan_result_update_fp(&self, scan_id: &str, hashes: &[String], flag: bool) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE tbl_scan_results SET false_positive = ? WHERE scan_instance_id = ? AND hash = ?",
            )?;
            for h in hashes {
                changed += stmt.execute(params![flag as i64, scan_id, h])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Insert a correlation and its members. Returns false if the id was
    /// already present.
    pub fn correlation_result_create(&self, c: &NewCorrelation) -> Result<bool> {
        if c.event_hashes.is_empty() {
            return Err(StoreError::Validation(format!("correlation {} has no events", c.rule_id)));
        }
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO tbl_scan_correlation_results \
             (id, scan_instance_id, title, rule_risk, rule_id, rule_name, rule_descr, rule_logic) VALUES (?,?,?,?,?,?,?,?)",
            params![c.id, c.scan_id, c.title, c.rule_risk, c.rule_id, c.rule_name, c.rule_descr, c.rule_logic],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO tbl_scan_correlation_results_events (correlation_id, event_hash) VALUES (?,?)",
            )?;
            for h in &c.event_hashes {
                stmt.execute(params![c.id, h])?;
            }
        }
        tx.commit()?;
        Ok(inserted > 0)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Recreate a finished scan from exported records. The ROOT record's
    /// data becomes the seed. Returns the number of events stored.
    pub fn import_scan(&self, scan_id: &str, name: &str, seed_type: &str, records: &[EventRecord]) -> Result<usize> {
        let root = records
            .iter()
            .find(|r| r.event_type == ROOT_TYPE)
            .ok_or_else(|| StoreError::Validation("records have no ROOT event".into()))?;
        self.scan_instance_create(scan_id, name, &root.data, seed_type)?;
        let n = self.import_records(scan_id, records)?;
        let now = now_ms();
        self.scan_instance_set(scan_id, Some(now), Some(now), Some(ScanStatus::Finished))?;
        Ok(n)
    }

    /// Bulk insert of previously exported events. Hashes are kept as
    /// exported so source links survive.
    pub fn import_records(&self, scan_id: &str, records: &[EventRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut n = 0;
        for r in records {
            if self.scan_record_store(scan_id, r, 0)? {
                n += 1;
            }
        }
        tx.commit()?;
        Ok(n)
    }
}


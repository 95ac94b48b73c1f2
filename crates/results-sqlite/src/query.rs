use crate::error::{Result, StoreError};
use crate::insert::join_scope;
use crate::models::*;
use crate::Db;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Row};
use spiderfoot_core::{EventRecord, ScanStatus, ROOT_HASH};
use std::collections::{BTreeMap, HashSet};

const RESULT_SELECT: &str = "SELECT c.generated, c.data, COALESCE(s.data, ''), c.module, c.type, \
     c.confidence, c.visibility, c.risk, c.hash, c.source_event_hash, t.event_descr, t.event_type, \
     c.scan_instance_id, c.false_positive, COALESCE(s.false_positive, 0) \
     FROM tbl_scan_results c \
     LEFT JOIN tbl_scan_results s ON s.scan_instance_id = c.scan_instance_id AND s.hash = c.source_event_hash \
     JOIN tbl_event_types t ON t.event = c.type";

fn result_row(r: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        generated: r.get(0)?,
        data: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        source_data: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
        module: r.get(3)?,
        event_type: r.get(4)?,
        confidence: r.get(5)?,
        visibility: r.get(6)?,
        risk: r.get(7)?,
        hash: r.get(8)?,
        source_hash: r.get::<_, Option<String>>(9)?.unwrap_or_default(),
        event_descr: r.get(10)?,
        event_kind: r.get(11)?,
        scan_id: r.get(12)?,
        false_positive: r.get::<_, i64>(13)? != 0,
        parent_false_positive: r.get::<_, i64>(14)? != 0,
    })
}

fn scan_row(r: &Row<'_>) -> rusqlite::Result<ScanInstance> {
    Ok(ScanInstance {
        guid: r.get(0)?,
        name: r.get(1)?,
        seed_target: r.get(2)?,
        seed_target_type: r.get(3)?,
        created: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
        started: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
        ended: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
        status: r.get(7)?,
    })
}

fn scoped_row(r: &Row<'_>) -> rusqlite::Result<(String, String)> {
    let scope: String = r.get(0)?;
    let opt: String = r.get(1)?;
    Ok((join_scope(&scope, &opt), r.get(2)?))
}

/// Builder for `... AND col IN (?,?,?)` clauses with positional binds.
struct Filter {
    sql: String,
    binds: Vec<SqlValue>,
}

impl Filter {
    fn new(base: &str, scan_id: &str) -> Self {
        Filter { sql: base.to_string(), binds: vec![SqlValue::Text(scan_id.to_string())] }
    }

    fn results(scan_id: &str) -> Self {
        Filter::new(&format!("{RESULT_SELECT} WHERE c.scan_instance_id = ?"), scan_id)
    }

    fn push(&mut self, clause: &str, v: impl Into<String>) {
        self.sql.push_str(clause);
        self.binds.push(SqlValue::Text(v.into()));
    }

    fn any_of(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let marks = vec!["?"; values.len()].join(",");
        self.sql.push_str(&format!(" AND {column} IN ({marks})"));
        self.binds.extend(values.iter().cloned().map(SqlValue::Text));
    }
}

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn scan_instance_get(&self, id: &str) -> Result<Option<ScanInstance>> {
        let mut stmt = self.conn.prepare(
            "SELECT guid, name, seed_target, seed_target_type, created, started, ended, status FROM tbl_scan_instance WHERE guid = ?",
        )?;
        let mut rows = stmt.query_map([id], scan_row)?;
        let first = rows.next().transpose()?;
        Ok(first)
    }

    pub fn scan_status(&self, id: &str) -> Result<Option<ScanStatus>> {
        match self.scan_instance_get(id)? {
            Some(s) => s
                .status
                .parse()
                .map(Some)
                .map_err(|e: spiderfoot_core::Error| StoreError::Validation(e.to_string())),
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn scan_instance_list(&self) -> Result<Vec<ScanListRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.guid, i.name, i.seed_target, i.seed_target_type, i.created, i.started, i.ended, i.status, \
             (SELECT COUNT(*) FROM tbl_scan_results r WHERE r.scan_instance_id = i.guid AND r.type <> 'ROOT') \
             FROM tbl_scan_instance i ORDER BY i.created DESC",
        )?;
        let rows = stmt.query_map([], |r| Ok(ScanListRow { scan: scan_row(r)?, result_count: r.get(8)? }))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn scan_result_events(&self, scan_id: &str, q: &EventQuery) -> Result<Vec<ResultRow>> {
        let mut f = Filter::results(scan_id);
        f.any_of("c.type", &q.types);
        f.any_of("c.module", &q.modules);
        f.any_of("c.data", &q.values);
        f.any_of("c.source_event_hash", &q.source_hashes);
        f.any_of("c.hash", &q.hashes);
        if let Some(cid) = &q.correlation_id {
            f.push(
                " AND c.hash IN (SELECT event_hash FROM tbl_scan_correlation_results_events WHERE correlation_id = ?)",
                cid.as_str(),
            );
        }
        if q.exclude_fp {
            f.sql.push_str(" AND c.false_positive <> 1");
        }
        f.sql.push_str(" ORDER BY c.data");
        self.result_rows(f)
    }

    /// Every stored event of a scan as flat records, in storage order. This
    /// is the lossless form read back by [`Db::import_scan`].
    pub fn scan_result_records(&self, scan_id: &str) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, data, module, generated, confidence, visibility, risk, hash, source_event_hash, \
             actual_source, module_data_source FROM tbl_scan_results WHERE scan_instance_id = ? ORDER BY rowid",
        )?;
        let rows = stmt.query_map([scan_id], |r| {
            Ok(EventRecord {
                event_type: r.get(0)?,
                data: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                module: r.get(2)?,
                generated: r.get(3)?,
                confidence: r.get(4)?,
                visibility: r.get(5)?,
                risk: r.get(6)?,
                hash: r.get(7)?,
                source_hash: r.get::<_, Option<String>>(8)?.unwrap_or_else(|| ROOT_HASH.to_string()),
                actual_source: r.get(9)?,
                module_data_source: r.get(10)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn result_rows(&self, f: Filter) -> Result<Vec<ResultRow>> {
        let mut stmt = self.conn.prepare(&f.sql)?;
        let rows = stmt.query_map(params_from_iter(f.binds.iter()), result_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn scan_result_summary(&self, scan_id: &str, by: SummaryBy) -> Result<Vec<SummaryRow>> {
        let sql = match by {
            SummaryBy::Type => {
                "SELECT r.type, e.event_descr, CAST(MAX(r.generated) AS INTEGER), COUNT(*), COUNT(DISTINCT r.data) \
                 FROM tbl_scan_results r JOIN tbl_event_types e ON e.event = r.type \
                 WHERE r.scan_instance_id = ? AND r.type <> 'ROOT' GROUP BY r.type ORDER BY e.event_descr"
            }
            SummaryBy::Module => {
                "SELECT r.module, '', CAST(MAX(r.generated) AS INTEGER), COUNT(*), COUNT(DISTINCT r.data) \
                 FROM tbl_scan_results r \
                 WHERE r.scan_instance_id = ? AND r.type <> 'ROOT' GROUP BY r.module ORDER BY r.module"
            }
            SummaryBy::Entity => {
                "SELECT r.data, e.event_descr, CAST(MAX(r.generated) AS INTEGER), COUNT(*), COUNT(DISTINCT r.data) \
                 FROM tbl_scan_results r JOIN tbl_event_types e ON e.event = r.type \
                 WHERE r.scan_instance_id = ? AND e.event_type = 'ENTITY' \
                 GROUP BY r.data ORDER BY COUNT(*) DESC LIMIT 50"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([scan_id], |r| {
            Ok(SummaryRow {
                key: r.get(0)?,
                description: r.get(1)?,
                last_seen: r.get(2)?,
                total: r.get(3)?,
                unique: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn scan_result_unique(&self, scan_id: &str, event_type: Option<&str>, exclude_fp: bool) -> Result<Vec<UniqueRow>> {
        let mut f = Filter::new(
            "SELECT data, type, COUNT(*) FROM tbl_scan_results WHERE scan_instance_id = ? AND type <> 'ROOT'",
            scan_id,
        );
        if let Some(t) = event_type {
            f.push(" AND type = ?", t);
        }
        if exclude_fp {
            f.sql.push_str(" AND false_positive <> 1");
        }
        f.sql.push_str(" GROUP BY type, data ORDER BY COUNT(*) DESC, data");
        let mut stmt = self.conn.prepare(&f.sql)?;
        let rows = stmt.query_map(params_from_iter(f.binds.iter()), |r| {
            Ok(UniqueRow { data: r.get(0)?, event_type: r.get(1)?, count: r.get(2)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Parents of the given events. ROOT has no parent.
    pub fn scan_element_sources_direct(&self, scan_id: &str, hashes: &[String]) -> Result<Vec<ResultRow>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let marks = vec!["?"; hashes.len()].join(",");
        let mut f = Filter::results(scan_id);
        f.sql.push_str(&format!(
            " AND c.hash IN (SELECT source_event_hash FROM tbl_scan_results WHERE scan_instance_id = ? AND hash <> 'ROOT' AND hash IN ({marks}))"
        ));
        f.binds.push(SqlValue::Text(scan_id.to_string()));
        f.binds.extend(hashes.iter().cloned().map(SqlValue::Text));
        self.result_rows(f)
    }

    /// Events whose parent is one of the given hashes.
    pub fn scan_element_children_direct(&self, scan_id: &str, hashes: &[String]) -> Result<Vec<ResultRow>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let mut f = Filter::results(scan_id);
        f.sql.push_str(" AND c.hash <> 'ROOT'");
        f.any_of("c.source_event_hash", hashes);
        self.result_rows(f)
    }

    /// Every ancestor of the given events, up to and including ROOT.
    pub fn scan_element_sources_all(&self, scan_id: &str, hashes: &[String]) -> Result<Vec<ResultRow>> {
        self.walk(scan_id, hashes, Self::scan_element_sources_direct)
    }

    /// Every descendant of the given events.
    pub fn scan_element_children_all(&self, scan_id: &str, hashes: &[String]) -> Result<Vec<ResultRow>> {
        self.walk(scan_id, hashes, Self::scan_element_children_direct)
    }

    fn walk(
        &self,
        scan_id: &str,
        start: &[String],
        step: fn(&Db, &str, &[String]) -> Result<Vec<ResultRow>>,
    ) -> Result<Vec<ResultRow>> {
        let mut seen: HashSet<String> = start.iter().cloned().collect();
        let mut frontier = start.to_vec();
        let mut out = Vec::new();
        while !frontier.is_empty() {
            let rows = step(self, scan_id, &frontier)?;
            frontier = Vec::new();
            for row in rows {
                if seen.insert(row.hash.clone()) {
                    frontier.push(row.hash.clone());
                    out.push(row);
                }
            }
        }
        Ok(out)
    }

    /// Newest first unless `reverse`. `from_rowid` returns only newer lines.
    pub fn scan_logs(
        &self,
        scan_id: &str,
        limit: Option<usize>,
        from_rowid: Option<i64>,
        reverse: bool,
    ) -> Result<Vec<LogRow>> {
        let mut f = Filter::new(
            "SELECT generated, component, type, message, rowid FROM tbl_scan_log WHERE scan_instance_id = ?",
            scan_id,
        );
        if let Some(id) = from_rowid {
            f.sql.push_str(" AND rowid > ?");
            f.binds.push(SqlValue::Integer(id));
        }
        f.sql.push_str(if reverse { " ORDER BY generated ASC, rowid ASC" } else { " ORDER BY generated DESC, rowid DESC" });
        if let Some(n) = limit {
            f.sql.push_str(" LIMIT ?");
            f.binds.push(SqlValue::Integer(n as i64));
        }
        self.log_rows(f)
    }

    pub fn scan_errors(&self, scan_id: &str, limit: Option<usize>) -> Result<Vec<LogRow>> {
        let mut f = Filter::new(
            "SELECT generated, component, type, message, rowid FROM tbl_scan_log WHERE scan_instance_id = ? AND type = 'ERROR' ORDER BY generated DESC, rowid DESC",
            scan_id,
        );
        if let Some(n) = limit {
            f.sql.push_str(" LIMIT ?");
            f.binds.push(SqlValue::Integer(n as i64));
        }
        self.log_rows(f)
    }

    fn log_rows(&self, f: Filter) -> Result<Vec<LogRow>> {
        let mut stmt = self.conn.prepare(&f.sql)?;
        let rows = stmt.query_map(params_from_iter(f.binds.iter()), |r| {
            Ok(LogRow {
                generated: r.get(0)?,
                component: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                level: r.get(2)?,
                message: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                rowid: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn config_get(&self) -> Result<BTreeMap<String, String>> {
        self.scoped_map("SELECT scope, opt, val FROM tbl_config", None)
    }

    pub fn scan_config_get(&self, scan_id: &str) -> Result<BTreeMap<String, String>> {
        self.scoped_map(
            "SELECT component, opt, val FROM tbl_scan_config WHERE scan_instance_id = ?",
            Some(scan_id),
        )
    }

    fn scoped_map(&self, sql: &str, scan_id: Option<&str>) -> Result<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match scan_id {
            Some(id) => stmt.query_map([id], scoped_row)?.collect::<rusqlite::Result<BTreeMap<_, _>>>()?,
            None => stmt.query_map([], scoped_row)?.collect::<rusqlite::Result<BTreeMap<_, _>>>()?,
        };
        Ok(rows)
    }

    /// Event counts per (`HH:MM weekday`, type) bucket.
    pub fn scan_result_history(&self, scan_id: &str) -> Result<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT STRFTIME('%H:%M %w', generated, 'unixepoch') AS bucket, type, COUNT(*) \
             FROM tbl_scan_results WHERE scan_instance_id = ? GROUP BY bucket, type ORDER BY bucket",
        )?;
        let rows = stmt.query_map([scan_id], |r| {
            Ok(HistoryRow { bucket: r.get(0)?, event_type: r.get(1)?, count: r.get(2)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn search(&self, c: &SearchCriteria) -> Result<Vec<ResultRow>> {
        let given = [c.scan_id.is_some(), c.event_type.is_some(), c.value.is_some()]
            .iter()
            .filter(|b| **b)
            .count();
        if given < 2 {
            return Err(StoreError::Validation("search needs at least two criteria".into()));
        }
        let mut f = Filter { sql: format!("{RESULT_SELECT} WHERE 1 = 1"), binds: Vec::new() };
        if let Some(id) = &c.scan_id {
            f.push(" AND c.scan_instance_id = ?", id.as_str());
        }
        if let Some(t) = &c.event_type {
            f.push(" AND c.type = ?", t.as_str());
        }
        if let Some(v) = &c.value {
            // Matches the event's own data or its source's data.
            let (clause, pattern) = if v.len() > 1 && v.starts_with('/') && v.ends_with('/') {
                (" AND (c.data REGEXP ? OR s.data REGEXP ?)", v[1..v.len() - 1].to_string())
            } else if v.contains('*') {
                (" AND (c.data LIKE ? OR s.data LIKE ?)", v.replace('*', "%"))
            } else {
                (" AND (c.data LIKE ? OR s.data LIKE ?)", format!("%{v}%"))
            };
            f.push(clause, pattern.as_str());
            f.binds.push(SqlValue::Text(pattern));
        }
        f.sql.push_str(" ORDER BY c.data");
        self.result_rows(f)
    }

    pub fn scan_correlation_list(&self, scan_id: &str) -> Result<Vec<CorrelationRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.title, c.rule_id, c.rule_risk, c.rule_name, c.rule_descr, c.rule_logic, COUNT(e.event_hash) \
             FROM tbl_scan_correlation_results c \
             LEFT JOIN tbl_scan_correlation_results_events e ON e.correlation_id = c.id \
             WHERE c.scan_instance_id = ? GROUP BY c.id ORDER BY c.title",
        )?;
        let rows = stmt.query_map([scan_id], |r| {
            Ok(CorrelationRow {
                id: r.get(0)?,
                title: r.get(1)?,
                rule_id: r.get(2)?,
                rule_risk: r.get(3)?,
                rule_name: r.get(4)?,
                rule_descr: r.get(5)?,
                rule_logic: r.get(6)?,
                event_count: r.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn scan_correlation_summary(&self, scan_id: &str, by: CorrelationSummaryBy) -> Result<Vec<CorrelationSummaryRow>> {
        let sql = match by {
            CorrelationSummaryBy::Risk => {
                "SELECT rule_risk, rule_risk, rule_risk, COUNT(*) FROM tbl_scan_correlation_results \
                 WHERE scan_instance_id = ? GROUP BY rule_risk ORDER BY rule_risk"
            }
            CorrelationSummaryBy::Rule => {
                "SELECT rule_id, rule_name, rule_risk, COUNT(*) FROM tbl_scan_correlation_results \
                 WHERE scan_instance_id = ? GROUP BY rule_id ORDER BY rule_id"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([scan_id], |r| {
            Ok(CorrelationSummaryRow { key: r.get(0)?, name: r.get(1)?, risk: r.get(2)?, count: r.get(3)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn correlation_event_hashes(&self, correlation_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_hash FROM tbl_scan_correlation_results_events WHERE correlation_id = ? ORDER BY event_hash",
        )?;
        let rows = stmt.query_map(params![correlation_id], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn event_types(&self) -> Result<Vec<EventTypeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT event, event_descr, event_raw, event_type FROM tbl_event_types ORDER BY event_descr",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(EventTypeRow {
                event: r.get(0)?,
                description: r.get(1)?,
                raw: r.get::<_, i64>(2)? != 0,
                kind: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

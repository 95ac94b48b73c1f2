use crate::error::Result;
use crate::models::ResultRow;
use serde::Serialize;
use spiderfoot_core::EventRecord;
use std::io::{Read, Write};
use time::macros::format_description;
use time::OffsetDateTime;

const CSV_HEADER: [&str; 6] = ["Updated", "Type", "Module", "Source", "F/P", "Data"];

/// `YYYY-MM-DD HH:MM:SS` in UTC. Empty when out of range.
pub fn format_timestamp(secs: f64) -> String {
    OffsetDateTime::from_unix_timestamp(secs as i64)
        .ok()
        .and_then(|dt| dt.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]")).ok())
        .unwrap_or_default()
}

/// One CSV line per event. ROOT rows are skipped. When `scan_name` is
/// given, a leading `Scan Name` column is added.
pub fn events_csv<W: Write>(rows: &[ResultRow], scan_name: Option<&str>, out: W) -> Result<()> {
    let mut w = csv::Writer::from_writer(out);
    let mut header: Vec<&str> = Vec::with_capacity(7);
    if scan_name.is_some() {
        header.push("Scan Name");
    }
    header.extend(CSV_HEADER);
    w.write_record(&header)?;
    for r in rows.iter().filter(|r| r.event_type != "ROOT") {
        let updated = format_timestamp(r.generated);
        let fp = if r.false_positive { "1" } else { "0" };
        let mut rec: Vec<&str> = Vec::with_capacity(7);
        if let Some(name) = scan_name {
            rec.push(name);
        }
        rec.extend([updated.as_str(), r.event_descr.as_str(), r.module.as_str(), r.source_data.as_str(), fp, r.data.as_str()]);
        w.write_record(&rec)?;
    }
    w.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct JsonEvent<'a> {
    pub data: &'a str,
    pub event_type: &'a str,
    pub module: &'a str,
    pub source_data: &'a str,
    pub false_positive: bool,
    pub last_seen: String,
    pub scan_name: &'a str,
    pub scan_target: &'a str,
}

/// Scan name and seed for each exported block of rows.
pub struct ScanRows<'a> {
    pub name: &'a str,
    pub target: &'a str,
    pub rows: &'a [ResultRow],
}

/// Flat JSON array over one or more scans. ROOT rows are skipped.
pub fn events_json(scans: &[ScanRows<'_>]) -> Result<serde_json::Value> {
    let mut out = Vec::new();
    for s in scans {
        for r in s.rows.iter().filter(|r| r.event_type != "ROOT") {
            out.push(serde_json::to_value(JsonEvent {
                data: &r.data,
                event_type: &r.event_type,
                module: &r.module,
                source_data: &r.source_data,
                false_positive: r.false_positive,
                last_seen: format_timestamp(r.generated),
                scan_name: s.name,
                scan_target: s.target,
            })?);
        }
    }
    Ok(serde_json::Value::Array(out))
}

/// Lossless export of stored events, ROOT included, as a JSON array of
/// records. [`read_records`] reads it back for import.
pub fn records_json<W: Write>(records: &[EventRecord], out: W) -> Result<()> {
    serde_json::to_writer_pretty(out, records)?;
    Ok(())
}

pub fn read_records<R: Read>(input: R) -> Result<Vec<EventRecord>> {
    Ok(serde_json::from_reader(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(t: &str, data: &str) -> ResultRow {
        ResultRow {
            generated: 0.0,
            data: data.into(),
            source_data: "example.com".into(),
            module: "sfp_dnsresolve".into(),
            event_type: t.into(),
            confidence: 100,
            visibility: 100,
            risk: 0,
            hash: format!("h-{data}"),
            source_hash: "ROOT".into(),
            event_descr: "IP Address".into(),
            event_kind: "ENTITY".into(),
            scan_id: "S".into(),
            false_positive: false,
            parent_false_positive: false,
        }
    }

    #[test]
    fn csv_has_header_and_skips_root() {
        let rows = vec![row("ROOT", "example.com"), row("IP_ADDRESS", "1.2.3.4")];
        let mut buf = Vec::new();
        events_csv(&rows, None, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Updated,Type,Module,Source,F/P,Data");
        assert_eq!(lines[1], "1970-01-01 00:00:00,IP Address,sfp_dnsresolve,example.com,0,1.2.3.4");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn json_merges_scans() {
        let a = vec![row("IP_ADDRESS", "1.2.3.4")];
        let b = vec![row("IP_ADDRESS", "5.6.7.8")];
        let v = events_json(&[
            ScanRows { name: "one", target: "a.com", rows: &a },
            ScanRows { name: "two", target: "b.com", rows: &b },
        ])
        .unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[1]["scan_name"], "two");
        assert_eq!(arr[0]["event_type"], "IP_ADDRESS");
    }

    #[test]
    fn timestamps_are_utc_and_zero_padded() {
        assert_eq!(format_timestamp(0.0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_005.9), "2023-11-14 22:13:25");
        assert_eq!(format_timestamp(f64::MAX), "");
    }

    #[test]
    fn records_keep_hashes_and_scores() {
        let rec = EventRecord {
            event_type: "IP_ADDRESS".into(),
            data: "1.2.3.4".into(),
            module: "sfp_dnsresolve".into(),
            generated: 1.5,
            confidence: 90,
            visibility: 80,
            risk: 20,
            hash: "abc".into(),
            source_hash: "ROOT".into(),
            actual_source: Some("www.example.com".into()),
            module_data_source: None,
        };
        let mut buf = Vec::new();
        records_json(std::slice::from_ref(&rec), &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("\"type\": \"IP_ADDRESS\""));
        assert!(!text.contains("module_data_source"));
        assert_eq!(read_records(buf.as_slice()).unwrap(), vec![rec]);
    }
}

use results_sqlite::*;
use spiderfoot_core::{Event, LogLevel, ScanStatus};
use std::collections::BTreeMap;
use std::sync::Arc;

const SCAN: &str = "0A1B2C3D";

fn fresh() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open_or_create(dir.path().join("sf.db")).unwrap();
    db.scan_instance_create(SCAN, "test scan", "example.com", "INTERNET_NAME").unwrap();
    (dir, db)
}

/// ROOT -> INTERNET_NAME -> IP_ADDRESS
fn chain(db: &Db) -> (Arc<Event>, Arc<Event>, Arc<Event>) {
    let root = Arc::new(Event::root("example.com").unwrap());
    let name = Arc::new(Event::new("INTERNET_NAME", "www.example.com", "SpiderFoot UI", &root).unwrap());
    let ip = Arc::new(Event::new("IP_ADDRESS", "1.2.3.4", "sfp_dnsresolve", &name).unwrap());
    for e in [&root, &name, &ip] {
        assert!(db.scan_event_store(SCAN, e, 0).unwrap());
    }
    (root, name, ip)
}

#[test]
fn new_scan_is_created_and_listed() {
    let (_d, db) = fresh();
    chain(&db);
    let scan = db.scan_instance_get(SCAN).unwrap().unwrap();
    assert_eq!(scan.status, "CREATED");
    assert_eq!(scan.seed_target_type, "INTERNET_NAME");
    assert!(scan.created > 0);
    assert_eq!(scan.started, 0);

    db.scan_instance_set(SCAN, Some(10), None, Some(ScanStatus::Running)).unwrap();
    assert_eq!(db.scan_status(SCAN).unwrap(), Some(ScanStatus::Running));

    let list = db.scan_instance_list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].result_count, 2);
    assert!(db.scan_instance_get("NOPE").unwrap().is_none());
}

#[test]
fn duplicate_events_are_ignored() {
    let (_d, db) = fresh();
    let (root, name, _) = chain(&db);
    assert!(!db.scan_event_store(SCAN, &name, 0).unwrap());

    let long = Event::new("RAW_RIR_DATA", "abcdefghij", "sfp_x", &root).unwrap();
    assert!(db.scan_event_store(SCAN, &long, 4).unwrap());
    let rows = db.scan_result_events(SCAN, &EventQuery::of_type("RAW_RIR_DATA")).unwrap();
    assert_eq!(rows[0].data, "abcd");

    let all = db.scan_result_events(SCAN, &EventQuery::default()).unwrap();
    assert_eq!(all.len(), 4);
}

#[test]
fn unknown_event_type_is_rejected() {
    let (_d, db) = fresh();
    let (root, _, _) = chain(&db);
    let bogus = Event::new("NOT_A_TYPE", "x", "sfp_x", &root).unwrap();
    assert!(matches!(db.scan_event_store(SCAN, &bogus, 0), Err(StoreError::Validation(_))));
}

#[test]
fn result_rows_carry_parent_and_type_metadata() {
    let (_d, db) = fresh();
    let (_, name, ip) = chain(&db);
    let rows = db
        .scan_result_events(SCAN, &EventQuery { hashes: vec![ip.hash().to_string()], ..Default::default() })
        .unwrap();
    assert_eq!(rows.len(), 1);
    let r = &rows[0];
    assert_eq!(r.source_data, "www.example.com");
    assert_eq!(r.source_hash, name.hash());
    assert_eq!(r.event_descr, "IP Address");
    assert_eq!(r.event_kind, "ENTITY");
    assert_eq!(r.scan_id, SCAN);
}

#[test]
fn walks_sources_and_children() {
    let (_d, db) = fresh();
    let (_, name, ip) = chain(&db);

    let up = db.scan_element_sources_all(SCAN, &[ip.hash().to_string()]).unwrap();
    let up: Vec<_> = up.iter().map(|r| r.hash.as_str()).collect();
    assert_eq!(up, vec![name.hash(), "ROOT"]);

    let down = db.scan_element_children_all(SCAN, &["ROOT".to_string()]).unwrap();
    let mut down: Vec<_> = down.iter().map(|r| r.hash.clone()).collect();
    down.sort();
    let mut want = vec![name.hash().to_string(), ip.hash().to_string()];
    want.sort();
    assert_eq!(down, want);

    assert!(db.scan_element_sources_direct(SCAN, &["ROOT".to_string()]).unwrap().is_empty());
}

#[test]
fn summaries_and_unique_values() {
    let (_d, db) = fresh();
    let (_, name, _) = chain(&db);
    let again = Event::new("IP_ADDRESS", "1.2.3.4", "sfp_other", &name).unwrap();
    db.scan_event_store(SCAN, &again, 0).unwrap();

    let by_type = db.scan_result_summary(SCAN, SummaryBy::Type).unwrap();
    let ip = by_type.iter().find(|r| r.key == "IP_ADDRESS").unwrap();
    assert_eq!((ip.total, ip.unique), (2, 1));
    assert!(by_type.iter().all(|r| r.key != "ROOT"));

    let by_module = db.scan_result_summary(SCAN, SummaryBy::Module).unwrap();
    assert_eq!(by_module.len(), 3);

    let unique = db.scan_result_unique(SCAN, Some("IP_ADDRESS"), false).unwrap();
    assert_eq!(unique, vec![UniqueRow { data: "1.2.3.4".into(), event_type: "IP_ADDRESS".into(), count: 2 }]);
}

#[test]
fn false_positive_flag_filters_results() {
    let (_d, db) = fresh();
    let (_, _, ip) = chain(&db);
    assert_eq!(db.scan_result_update_fp(SCAN, &[ip.hash().to_string()], true).unwrap(), 1);
    let q = EventQuery { exclude_fp: true, ..EventQuery::of_type("IP_ADDRESS") };
    assert!(db.scan_result_events(SCAN, &q).unwrap().is_empty());
    assert!(db.scan_result_unique(SCAN, None, true).unwrap().iter().all(|u| u.data != "1.2.3.4"));
}

#[test]
fn search_needs_two_criteria() {
    let (_d, db) = fresh();
    chain(&db);
    let one = SearchCriteria { scan_id: Some(SCAN.into()), ..Default::default() };
    assert!(matches!(db.search(&one), Err(StoreError::Validation(_))));

    let glob = SearchCriteria {
        scan_id: Some(SCAN.into()),
        event_type: Some("INTERNET_NAME".into()),
        value: Some("*.example.com".into()),
    };
    assert_eq!(db.search(&glob).unwrap().len(), 1);

    let re = SearchCriteria { event_type: Some("IP_ADDRESS".into()), value: Some("/1\\.2\\..*/".into()), ..Default::default() };
    assert_eq!(db.search(&re).unwrap()[0].data, "1.2.3.4");
}

#[test]
fn search_value_is_a_case_insensitive_substring_of_data_or_source() {
    let (_d, db) = fresh();
    chain(&db);
    let by_value = |v: &str| {
        let c = SearchCriteria { scan_id: Some(SCAN.into()), value: Some(v.into()), ..Default::default() };
        db.search(&c).unwrap().into_iter().map(|r| r.data).collect::<Vec<_>>()
    };
    // ROOT and the name contain it; the IP is reached through its source.
    assert_eq!(by_value("example"), vec!["1.2.3.4", "example.com", "www.example.com"]);
    assert_eq!(by_value("WWW.EXAMPLE.COM"), vec!["1.2.3.4", "www.example.com"]);
    assert_eq!(by_value("2.3"), vec!["1.2.3.4"]);
    assert!(by_value("nothing-here").is_empty());

    let glob_via_source = SearchCriteria {
        event_type: Some("IP_ADDRESS".into()),
        value: Some("www.*".into()),
        ..Default::default()
    };
    assert_eq!(db.search(&glob_via_source).unwrap()[0].data, "1.2.3.4");
}

#[test]
fn config_scopes_round_trip() {
    let (_d, db) = fresh();
    let mut opts = BTreeMap::new();
    opts.insert("_debug".to_string(), "1".to_string());
    opts.insert("sfp_dnsresolve:maxnetblock".to_string(), "24".to_string());
    db.config_set(&opts).unwrap();
    assert_eq!(db.config_get().unwrap(), opts);
    db.config_clear().unwrap();
    assert!(db.config_get().unwrap().is_empty());

    db.scan_config_set(SCAN, &opts).unwrap();
    let scope: String = db
        .conn
        .query_row("SELECT component FROM tbl_scan_config WHERE opt = 'maxnetblock'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(scope, "sfp_dnsresolve");
    assert_eq!(db.scan_config_get(SCAN).unwrap(), opts);
}

#[test]
fn logs_and_errors() {
    let (_d, db) = fresh();
    db.scan_log_event(SCAN, "SpiderFoot", LogLevel::Info, "starting").unwrap();
    db.scan_log_event(SCAN, "sfp_x", LogLevel::Error, "boom").unwrap();
    let logs = db.scan_logs(SCAN, None, None, true).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].level, "STATUS");
    let errors = db.scan_errors(SCAN, Some(10)).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].component, "sfp_x");
    let newer = db.scan_logs(SCAN, None, Some(logs[0].rowid), true).unwrap();
    assert_eq!(newer.len(), 1);
}

fn correlation(hashes: Vec<String>) -> NewCorrelation {
    NewCorrelation {
        id: "c0ffee".into(),
        scan_id: SCAN.into(),
        rule_id: "internal_host".into(),
        rule_name: "Internal host".into(),
        rule_descr: "Host resolves to a private address".into(),
        rule_risk: "LOW".into(),
        rule_logic: "id: internal_host".into(),
        title: "www.example.com is internal".into(),
        event_hashes: hashes,
    }
}

#[test]
fn correlations_are_idempotent() {
    let (_d, db) = fresh();
    let (_, name, ip) = chain(&db);
    let c = correlation(vec![name.hash().to_string(), ip.hash().to_string()]);
    assert!(db.correlation_result_create(&c).unwrap());
    assert!(!db.correlation_result_create(&c).unwrap());

    let list = db.scan_correlation_list(SCAN).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].event_count, 2);
    let by_risk = db.scan_correlation_summary(SCAN, CorrelationSummaryBy::Risk).unwrap();
    assert_eq!(by_risk[0].key, "LOW");

    let q = EventQuery { correlation_id: Some("c0ffee".into()), ..Default::default() };
    assert_eq!(db.scan_result_events(SCAN, &q).unwrap().len(), 2);
}

#[test]
fn delete_removes_everything_for_the_scan() {
    let (_d, db) = fresh();
    let (_, name, _) = chain(&db);
    db.scan_log_event(SCAN, "SpiderFoot", LogLevel::Info, "x").unwrap();
    db.scan_config_set(SCAN, &BTreeMap::from([("_debug".to_string(), "0".to_string())])).unwrap();
    db.correlation_result_create(&correlation(vec![name.hash().to_string()])).unwrap();

    db.scan_instance_delete(SCAN).unwrap();
    for table in [
        "tbl_scan_instance",
        "tbl_scan_results",
        "tbl_scan_log",
        "tbl_scan_config",
        "tbl_scan_correlation_results",
        "tbl_scan_correlation_results_events",
    ] {
        let n: i64 = db.conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0, "{table} not empty");
    }
}

#[test]
fn history_buckets_by_minute() {
    let (_d, db) = fresh();
    chain(&db);
    let h = db.scan_result_history(SCAN).unwrap();
    assert_eq!(h.iter().map(|r| r.count).sum::<i64>(), 3);
    assert!(h.iter().all(|r| r.bucket.len() == 7));
}

#[test]
fn parquet_export_writes_every_event() {
    let (dir, db) = fresh();
    chain(&db);
    let out = dir.path().join("events.parquet");
    let n = export_parquet::export_events_to_parquet(&db.conn, SCAN, &out).unwrap();
    assert_eq!(n, 3);
    assert!(std::fs::metadata(&out).unwrap().len() > 0);
}

#[test]
fn exported_records_reimport_with_same_hashes() {
    let (_d, db) = fresh();
    let (_, name, _) = chain(&db);
    let mx = Event::new("INTERNET_NAME", "mail.example.com", "sfp_dnsresolve", &name)
        .unwrap()
        .with_risk(30)
        .unwrap()
        .with_actual_source("www.example.com");
    db.scan_event_store(SCAN, &mx, 0).unwrap();

    let mut buf = Vec::new();
    export::records_json(&db.scan_result_records(SCAN).unwrap(), &mut buf).unwrap();
    let records = export::read_records(buf.as_slice()).unwrap();
    assert_eq!(records.len(), 4);

    assert_eq!(db.import_scan("FEEDBEEF", "imported", "INTERNET_NAME", &records).unwrap(), 4);
    let scan = db.scan_instance_get("FEEDBEEF").unwrap().unwrap();
    assert_eq!(scan.seed_target, "example.com");
    assert_eq!(scan.status, "FINISHED");

    let original = db.scan_result_records(SCAN).unwrap();
    let imported = db.scan_result_records("FEEDBEEF").unwrap();
    assert_eq!(imported, original);
    // Source links resolve in the new scan too.
    let q = EventQuery { source_hashes: vec![name.hash().to_string()], ..Default::default() };
    let children = db.scan_result_events("FEEDBEEF", &q).unwrap();
    assert_eq!(children.iter().map(|r| r.source_data.as_str()).collect::<Vec<_>>(), ["www.example.com"; 2]);

    let no_root = &records[1..];
    assert!(matches!(db.import_scan("DEADBEEF", "x", "INTERNET_NAME", no_root), Err(StoreError::Validation(_))));
}

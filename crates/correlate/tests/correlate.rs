use correlate::{bundled_rules, CorrelationError, Correlator, Rule};
use results_sqlite::Db;
use spiderfoot_core::{Event, ScanStatus};
use std::sync::Arc;

struct Scan {
    _dir: tempfile::TempDir,
    db: Db,
}

fn emit(db: &Db, t: &str, data: &str, module: &str, source: &Arc<Event>) -> Arc<Event> {
    let e = Arc::new(Event::new(t, data, module, source).unwrap());
    assert!(db.scan_event_store("S1", &e, 0).unwrap());
    e
}

/// ROOT -> www.example.net -> { 10.0.0.5, web content -> two errors }
///      -> 1.2.3.4 -> two malicious reports; 5.6.7.8 -> one report
fn scan() -> Scan {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("sf.db")).unwrap();
    db.scan_instance_create("S1", "corr", "example.net", "INTERNET_NAME").unwrap();
    let root = Arc::new(Event::root("example.net").unwrap());
    db.scan_event_store("S1", &root, 0).unwrap();

    let host = emit(&db, "INTERNET_NAME", "www.example.net", "sfp_dnsresolve", &root);
    emit(&db, "IP_ADDRESS", "10.0.0.5", "sfp_dnsresolve", &host);
    let page = emit(&db, "TARGET_WEB_CONTENT", "<html>oops</html>", "sfp_spider", &host);
    emit(&db, "ERROR_MESSAGE", "PHP Error", "sfp_errors", &page);
    emit(&db, "ERROR_MESSAGE", "SQL syntax error\nnear line 1", "sfp_errors", &page);

    let ip = emit(&db, "IP_ADDRESS", "1.2.3.4", "sfp_dnsresolve", &root);
    emit(&db, "MALICIOUS_IPADDR", "list A [1.2.3.4]", "sfp_lista", &ip);
    emit(&db, "MALICIOUS_IPADDR", "list B [1.2.3.4]", "sfp_listb", &ip);
    let other = emit(&db, "IP_ADDRESS", "5.6.7.8", "sfp_dnsresolve", &root);
    emit(&db, "MALICIOUS_IPADDR", "list A [5.6.7.8]", "sfp_lista", &other);

    db.scan_instance_set("S1", Some(1), Some(2), Some(ScanStatus::Finished)).unwrap();
    Scan { _dir: dir, db }
}

#[test]
fn bundled_rules_find_expected_results() {
    let s = scan();
    let c = Correlator::new(&s.db, "S1", bundled_rules().unwrap()).unwrap();
    assert_eq!(c.run().unwrap(), 4);

    let mut titles: Vec<String> = s.db.scan_correlation_list("S1").unwrap().into_iter().map(|r| r.title).collect();
    titles.sort();
    assert_eq!(
        titles,
        vec![
            "Entity considered malicious by multiple sources: 1.2.3.4",
            "Error message found on target web content: PHP Error",
            "Error message found on target web content: SQL syntax error",
            "Host resolves to internal IP address: 10.0.0.5",
        ]
    );

    let rows = s.db.scan_correlation_list("S1").unwrap();
    let malicious = rows.iter().find(|r| r.rule_id == "multiple_malicious").unwrap();
    assert_eq!(malicious.event_count, 2);
    assert_eq!(malicious.rule_risk, "HIGH");
    assert!(malicious.rule_logic.contains("count_unique_only"));
}

#[test]
fn rerunning_adds_nothing() {
    let s = scan();
    let c = Correlator::new(&s.db, "S1", bundled_rules().unwrap()).unwrap();
    c.run().unwrap();
    assert_eq!(c.run().unwrap(), 0);
    assert_eq!(s.db.scan_correlation_list("S1").unwrap().len(), 4);
}

#[test]
fn entities_are_found_through_non_entity_parents() {
    let s = scan();
    let rule = Rule::parse(
        r#"
id: errors_by_host
meta:
  name: Errors by host
  description: Hosts serving error pages.
  risk: INFO
collections:
  - collect:
      - method: exact
        field: type
        value: ERROR_MESSAGE
aggregation:
  field: entity.data
analysis:
  - method: threshold
    field: data
    minimum: 1
headline: "{entity.data} serves errors"
"#,
    )
    .unwrap();
    let c = Correlator::new(&s.db, "S1", vec![rule.clone()]).unwrap();
    let buckets = c.process_rule(&rule).unwrap();
    assert_eq!(buckets.keys().collect::<Vec<_>>(), vec!["www.example.net"]);
    assert_eq!(buckets["www.example.net"].len(), 2);
    assert_eq!(c.title(&rule, &buckets["www.example.net"]), "www.example.net serves errors");
}

#[test]
fn refuses_running_and_unknown_scans() {
    let s = scan();
    s.db.scan_instance_set("S1", None, None, Some(ScanStatus::Running)).unwrap();
    let c = Correlator::new(&s.db, "S1", bundled_rules().unwrap()).unwrap();
    assert!(matches!(c.run(), Err(CorrelationError::ScanRunning { .. })));

    let c = Correlator::new(&s.db, "NOPE", bundled_rules().unwrap()).unwrap();
    assert!(matches!(c.run(), Err(CorrelationError::InvalidScan(_))));
}

#[test]
fn unknown_exact_type_is_a_rule_error() {
    let s = scan();
    let rule = Rule::parse(
        "id: x\nmeta: {name: X, description: Y, risk: LOW}\ncollections:\n  - collect:\n      - {method: exact, field: type, value: NO_SUCH_TYPE}\nheadline: x\n",
    )
    .unwrap();
    let c = Correlator::new(&s.db, "S1", vec![rule]).unwrap();
    assert!(matches!(c.run(), Err(CorrelationError::Syntax(_))));
}

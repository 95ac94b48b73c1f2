use parking_lot::Mutex;
use results_sqlite::{Db, EventQuery};
use scan_engine::{stop_scan, ScanDeps, ScanError, ScanRequest, Scanner, SEED_MODULE, STORAGE_MODULE};
use serde_json::json;
use spiderfoot_core::plugin::str_list;
use spiderfoot_core::testing::FakeServices;
use spiderfoot_core::{
    Event, GlobalConfig, OptMap, Plugin, PluginContext, PluginError, PluginMeta, PluginRegistry, ScanStatus,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static ENTERED: Mutex<BTreeMap<&'static str, usize>> = Mutex::new(BTreeMap::new());
static BURST_TOOK: Mutex<BTreeMap<&'static str, Duration>> = Mutex::new(BTreeMap::new());

fn entered(name: &'static str) -> usize {
    ENTERED.lock().get(name).copied().unwrap_or(0)
}

#[derive(Clone, Copy)]
enum Behaviour {
    /// Re-emit the incoming data under another type.
    Relay(&'static str),
    /// Emit a fresh name for every event, slowly, forever.
    Endless,
    /// On the first event, emit this many IP addresses as fast as possible.
    Burst(usize),
    /// Sleep this many milliseconds per event.
    Slow(u64),
    Reject,
    Panic,
    BadSetup,
}

struct TestPlugin {
    name: &'static str,
    watch: &'static str,
    behaviour: Behaviour,
    ctx: Option<PluginContext>,
    counter: usize,
}

impl TestPlugin {
    fn boxed(name: &'static str, watch: &'static str, behaviour: Behaviour) -> Box<dyn Plugin> {
        Box::new(TestPlugin { name, watch, behaviour, ctx: None, counter: 0 })
    }
}

impl Plugin for TestPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta { name: self.name, summary: "test", flags: &[], use_cases: &[], categories: &[], data_source: None }
    }

    fn opts(&self) -> OptMap {
        OptMap::from([("delay".to_string(), json!(0))])
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("delay".to_string(), "unused".to_string())])
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&[self.watch])
    }

    fn produced_events(&self) -> Vec<String> {
        match self.behaviour {
            Behaviour::Relay(t) => str_list(&[t]),
            Behaviour::Burst(_) => str_list(&["IP_ADDRESS"]),
            _ => str_list(&["INTERNET_NAME"]),
        }
    }

    fn setup(&mut self, ctx: PluginContext, _user_opts: &OptMap) -> Result<(), PluginError> {
        if let Behaviour::BadSetup = self.behaviour {
            return Err(PluginError::Configuration("missing api key".into()));
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        *ENTERED.lock().entry(self.name).or_default() += 1;
        let Some(ctx) = &self.ctx else { return Ok(()) };
        match self.behaviour {
            Behaviour::Relay(t) => ctx.notify_listeners(Event::new(t, event.data(), self.name, event)?),
            Behaviour::Endless => {
                std::thread::sleep(Duration::from_millis(20));
                self.counter += 1;
                let name = format!("h{}.example.net", self.counter);
                ctx.notify_listeners(Event::new("INTERNET_NAME", name, self.name, event)?);
            }
            Behaviour::Burst(n) if self.counter == 0 => {
                self.counter += 1;
                let started = Instant::now();
                for i in 0..n {
                    let ip = format!("10.0.{}.{}", i / 256, i % 256);
                    ctx.notify_listeners(Event::new("IP_ADDRESS", ip, self.name, event)?);
                }
                BURST_TOOK.lock().insert(self.name, started.elapsed());
            }
            Behaviour::Burst(_) => {}
            Behaviour::Slow(ms) => std::thread::sleep(Duration::from_millis(ms)),
            Behaviour::Reject => return Err(PluginError::Rejected("403".into())),
            Behaviour::Panic => panic!("boom"),
            Behaviour::BadSetup => {}
        }
        Ok(())
    }
}

fn registry() -> Arc<PluginRegistry> {
    let mut r = PluginRegistry::new();
    r.register(|| TestPlugin::boxed("sfp_test_a", "IP_ADDRESS", Behaviour::Relay("INTERNET_NAME")))
        .register(|| TestPlugin::boxed("sfp_test_b", "INTERNET_NAME", Behaviour::Relay("IP_ADDRESS")))
        .register(|| TestPlugin::boxed("sfp_test_a_direct", "IP_ADDRESS", Behaviour::Relay("INTERNET_NAME")))
        .register(|| TestPlugin::boxed("sfp_test_b_direct", "INTERNET_NAME", Behaviour::Relay("IP_ADDRESS")))
        .register(|| TestPlugin::boxed("sfp_test_endless", "*", Behaviour::Endless))
        .register(|| TestPlugin::boxed("sfp_test_endless_db", "*", Behaviour::Endless))
        .register(|| TestPlugin::boxed("sfp_test_reject", "*", Behaviour::Reject))
        .register(|| TestPlugin::boxed("sfp_test_panic", "IP_ADDRESS", Behaviour::Panic))
        .register(|| TestPlugin::boxed("sfp_test_after_panic", "IP_ADDRESS", Behaviour::Relay("INTERNET_NAME")))
        .register(|| TestPlugin::boxed("sfp_test_bad_setup", "*", Behaviour::BadSetup))
        .register(|| TestPlugin::boxed("sfp_test_burst", "INTERNET_NAME", Behaviour::Burst(300)))
        .register(|| TestPlugin::boxed("sfp_test_slow", "IP_ADDRESS", Behaviour::Slow(5)))
        .register(|| TestPlugin::boxed("sfp_test_burst_self", "*", Behaviour::Burst(300)));
    Arc::new(r)
}

fn global(threads: usize) -> OptMap {
    let mut opts = GlobalConfig::default().to_opts();
    opts.insert("_maxthreads".into(), json!(threads));
    opts.insert("_aborttimeout".into(), json!(5));
    opts
}

fn request(id: &str, seed: &str, seed_type: &str, modules: &[&str], threads: usize) -> ScanRequest {
    ScanRequest {
        name: format!("scan {id}"),
        scan_id: id.to_string(),
        target_value: seed.to_string(),
        target_type: seed_type.to_string(),
        module_list: modules.iter().map(|m| m.to_string()).collect(),
        global_opts: global(threads),
        module_opts: BTreeMap::new(),
    }
}

fn deps(path: &Path) -> ScanDeps {
    ScanDeps { db_path: path.to_path_buf(), registry: registry(), services: Some(Arc::new(FakeServices::new())) }
}

fn db_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("spiderfoot.db")
}

fn rows(path: &Path, id: &str) -> Vec<results_sqlite::ResultRow> {
    Db::open(path).unwrap().scan_result_events(id, &EventQuery::default()).unwrap()
}

#[test]
fn storage_only_scan_stores_just_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let scanner = Scanner::new(request("MIN", "example.net", "INTERNET_NAME", &[STORAGE_MODULE], 3), deps(&path)).unwrap();
    assert!(scanner.loaded_modules().is_empty());
    assert_eq!(scanner.run().unwrap(), ScanStatus::Finished);

    let stored = rows(&path, "MIN");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].event_type, "ROOT");
    assert_eq!(stored[0].data, "example.net");
    assert_eq!(stored[0].module, "");

    let db = Db::open(&path).unwrap();
    let scan = db.scan_instance_get("MIN").unwrap().unwrap();
    assert_eq!(scan.status, "FINISHED");
    assert!(scan.started > 0 && scan.ended >= scan.started);
    let cfg = db.scan_config_get("MIN").unwrap();
    assert_eq!(cfg.get("_modulesenabled").map(String::as_str), Some(STORAGE_MODULE));
    assert_eq!(cfg.get("sfp__stor_db:maxstorage").map(String::as_str), Some("1024"));
}

fn assert_loop_broken(path: &Path, id: &str, a: &str, b: &str) {
    let stored = rows(path, id);
    assert_eq!(stored.len(), 4, "{stored:#?}");
    let by_module = |m: &str| stored.iter().filter(|r| r.module == m).count();
    assert_eq!(by_module(SEED_MODULE), 1);
    assert_eq!(by_module(a), 1);
    assert_eq!(by_module(b), 1);
    assert!(stored.iter().all(|r| r.data == "1.2.3.4"));
}

#[test]
fn ancestor_repeats_are_stored_but_not_fanned_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let scanner =
        Scanner::new(request("LOOP", "1.2.3.4", "IP_ADDRESS", &["sfp_test_a", "sfp_test_b"], 3), deps(&path)).unwrap();
    assert_eq!(scanner.run().unwrap(), ScanStatus::Finished);
    assert_loop_broken(&path, "LOOP", "sfp_test_a", "sfp_test_b");
    assert_eq!(entered("sfp_test_a"), 1);
    assert_eq!(entered("sfp_test_b"), 1);
}

#[test]
fn direct_mode_delivers_on_the_calling_thread() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let req = request("DIRECT", "1.2.3.4", "IP_ADDRESS", &["sfp_test_a_direct", "sfp_test_b_direct"], 0);
    assert_eq!(Scanner::new(req, deps(&path)).unwrap().run().unwrap(), ScanStatus::Finished);
    assert_loop_broken(&path, "DIRECT", "sfp_test_a_direct", "sfp_test_b_direct");
}

#[test]
fn stop_handle_aborts_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let scanner = Scanner::new(request("STOP", "example.net", "INTERNET_NAME", &["sfp_test_endless"], 3), deps(&path)).unwrap();
    let handle = scanner.handle();
    let at_stop = Arc::new(AtomicUsize::new(0));
    let seen = at_stop.clone();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        seen.store(entered("sfp_test_endless"), Ordering::SeqCst);
        handle.stop().unwrap();
    });
    assert_eq!(scanner.run().unwrap(), ScanStatus::Aborted);
    stopper.join().unwrap();
    assert!(entered("sfp_test_endless") <= at_stop.load(Ordering::SeqCst) + 1);
    let db = Db::open(&path).unwrap();
    assert_eq!(db.scan_status("STOP").unwrap(), Some(ScanStatus::Aborted));
}

#[test]
fn stop_requested_through_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let scanner =
        Scanner::new(request("DBSTOP", "example.net", "INTERNET_NAME", &["sfp_test_endless_db"], 3), deps(&path)).unwrap();
    let p = path.clone();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        let db = Db::open(&p).unwrap();
        assert!(stop_scan(&db, "DBSTOP").unwrap());
    });
    assert_eq!(scanner.run().unwrap(), ScanStatus::Aborted);
    stopper.join().unwrap();
    let db = Db::open(&path).unwrap();
    assert!(!stop_scan(&db, "DBSTOP").unwrap());
    assert!(!stop_scan(&db, "NOPE").unwrap());
}

#[test]
fn rejected_plugin_receives_no_further_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let req = request("REJECT", "example.net", "INTERNET_NAME", &["sfp_test_reject"], 3);
    assert_eq!(Scanner::new(req, deps(&path)).unwrap().run().unwrap(), ScanStatus::Finished);
    assert_eq!(entered("sfp_test_reject"), 1);
    let errors = Db::open(&path).unwrap().scan_errors("REJECT", None).unwrap();
    assert!(errors.iter().any(|e| e.component == "sfp_test_reject"));
}

#[test]
fn panicking_plugin_does_not_fail_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let req = request("PANIC", "1.2.3.4", "IP_ADDRESS", &["sfp_test_panic", "sfp_test_after_panic"], 2);
    assert_eq!(Scanner::new(req, deps(&path)).unwrap().run().unwrap(), ScanStatus::Finished);
    assert_eq!(entered("sfp_test_panic"), 1);
    assert!(rows(&path, "PANIC").iter().any(|r| r.module == "sfp_test_after_panic"));
}

#[test]
fn unknown_and_failing_modules_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let req = request("SKIP", "1.2.3.4", "IP_ADDRESS", &["sfp_nope", "sfp_test_bad_setup", "sfp_test_a"], 1);
    let scanner = Scanner::new(req, deps(&path)).unwrap();
    assert_eq!(scanner.loaded_modules(), vec!["sfp_test_a".to_string()]);
    assert_eq!(scanner.run().unwrap(), ScanStatus::Finished);

    let db = Db::open(&path).unwrap();
    let logs = db.scan_logs("SKIP", None, None, true).unwrap();
    assert!(logs.iter().any(|l| l.message.contains("sfp_nope")));
    assert!(logs.iter().any(|l| l.level == "ERROR" && l.message.contains("sfp_test_bad_setup")));
    let enabled = db.scan_config_get("SKIP").unwrap().remove("_modulesenabled").unwrap();
    assert!(!enabled.contains("sfp_nope"));
}

#[test]
fn invalid_requests_leave_no_scan_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut bad_type = request("BAD1", "example.net", "NOT_A_TYPE", &["sfp_test_a"], 1);
    assert!(matches!(Scanner::new(bad_type.clone(), deps(&path)), Err(ScanError::Validation(_))));
    bad_type.target_type = "INTERNET_NAME".into();
    bad_type.module_list.clear();
    assert!(matches!(Scanner::new(bad_type.clone(), deps(&path)), Err(ScanError::Validation(_))));
    bad_type.module_list = vec!["sfp_test_a".into()];
    bad_type.name = " ".into();
    assert!(matches!(Scanner::new(bad_type, deps(&path)), Err(ScanError::Validation(_))));
    assert!(Db::open(&path).unwrap().scan_instance_list().unwrap().is_empty());
}

#[test]
fn fast_producer_is_throttled_by_slow_listener() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let req = request("BURST", "example.net", "INTERNET_NAME", &["sfp_test_burst", "sfp_test_slow"], 3);
    assert_eq!(Scanner::new(req, deps(&path)).unwrap().run().unwrap(), ScanStatus::Finished);

    // Unthrottled, 300 emissions take a few milliseconds. Bounded, the
    // producer can only run ahead of the 5ms-per-event listener by the
    // outgoing queue plus one plugin queue.
    let took = BURST_TOOK.lock()["sfp_test_burst"];
    assert!(took >= Duration::from_millis(600), "producer finished in {took:?}");
    assert_eq!(entered("sfp_test_slow"), 300);
    let ips = rows(&path, "BURST").iter().filter(|r| r.event_type == "IP_ADDRESS").count();
    assert_eq!(ips, 300);
}

#[test]
fn producer_feeding_itself_does_not_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let req = request("SELF", "example.net", "INTERNET_NAME", &["sfp_test_burst_self"], 1);
    assert_eq!(Scanner::new(req, deps(&path)).unwrap().run().unwrap(), ScanStatus::Finished);
    let ips = rows(&path, "SELF").iter().filter(|r| r.event_type == "IP_ADDRESS").count();
    assert_eq!(ips, 300);
    assert!(entered("sfp_test_burst_self") >= 301);
}

use crate::bus::{Bus, COMPONENT};
use crate::sink::{StoragePlugin, StorageSink, STORAGE_MODULE};
use crate::ScanError;
use parking_lot::{Mutex, RwLock};
use results_sqlite::{now_ms, Db, LogWriter, SharedDb};
use spiderfoot_core::config::serialize_opts;
use spiderfoot_core::domain::is_domain;
use spiderfoot_core::plugin::merge_opts;
use spiderfoot_core::scanlog::NullLog;
use spiderfoot_core::target::normalize_seed;
use spiderfoot_core::threadpool::ThreadPool;
use spiderfoot_core::{
    Event, EventSink, GlobalConfig, LogLevel, OptMap, Plugin, PluginContext, PluginRegistry, ScanLog, ScanStatus,
    Services, Target, TargetType,
};
use spiderfoot_services::SfServices;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Module name stamped on the seed events.
pub const SEED_MODULE: &str = "SpiderFoot UI";

/// Per-plugin limit on queued plus running deliveries before the
/// dispatcher blocks.
const PLUGIN_QUEUE: usize = 10;
/// Events awaiting fan-out before emitting plugins block.
const OUTGOING_LIMIT: usize = 50;
const BUSY_TICK: Duration = Duration::from_millis(10);
const IDLE_TICK: Duration = Duration::from_millis(100);
const STATUS_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub name: String,
    pub scan_id: String,
    pub target_value: String,
    pub target_type: String,
    pub module_list: Vec<String>,
    pub global_opts: OptMap,
    pub module_opts: BTreeMap<String, OptMap>,
}

/// What the controller needs from its surroundings.
pub struct ScanDeps {
    pub db_path: PathBuf,
    pub registry: Arc<PluginRegistry>,
    /// Built from the scan's configuration when absent.
    pub services: Option<Arc<dyn Services>>,
}

struct Slot {
    name: String,
    plugin: Mutex<Box<dyn Plugin>>,
    ctx: PluginContext,
    watched: Vec<String>,
}

impl Slot {
    fn wants(&self, event: &Event) -> bool {
        let wildcard = self.watched.iter().any(|w| w == "*");
        (wildcard || self.watched.iter().any(|w| w == event.event_type()))
            && (wildcard || self.name != event.module())
            && !self.ctx.error_state()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn deliver(bus: &Bus, slot: &Slot, event: &Arc<Event>) {
    if slot.ctx.check_for_stop() || slot.ctx.error_state() {
        return;
    }
    let mut plugin = slot.plugin.lock();
    bus.enter(&slot.name);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| plugin.handle_event(event)));
    bus.leave(&slot.name);
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            slot.ctx.error(&format!("Module {} failed on {} event: {e}", slot.name, event.event_type()));
            if e.disables_plugin() {
                slot.ctx.set_error_state();
            }
        }
        Err(payload) => {
            slot.ctx.error(&format!(
                "Module {} panicked on {} event: {}",
                slot.name,
                event.event_type(),
                panic_message(payload.as_ref())
            ));
        }
    }
}

/// Requests a stop from any process sharing the database. Returns false
/// when the scan is unknown or already over.
pub fn stop_scan(db: &Db, scan_id: &str) -> Result<bool, ScanError> {
    match db.scan_status(scan_id)? {
        Some(s) if !s.is_terminal() => {
            db.scan_instance_set(scan_id, None, None, Some(ScanStatus::AbortRequested))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// In-process stop handle for a running scan.
#[derive(Clone)]
pub struct ScanHandle {
    scan_id: String,
    db: SharedDb,
    stop: Arc<AtomicBool>,
}

impl ScanHandle {
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn stop(&self) -> Result<(), ScanError> {
        self.stop.store(true, Ordering::SeqCst);
        stop_scan(&self.db.lock(), &self.scan_id)?;
        Ok(())
    }
}

/// Owns one scan from validation to its terminal status.
pub struct Scanner {
    scan_id: String,
    target: Arc<RwLock<Target>>,
    cfg: GlobalConfig,
    db: SharedDb,
    bus: Arc<Bus>,
    slots: Vec<Arc<Slot>>,
    stop: Arc<AtomicBool>,
    pool: Option<ThreadPool>,
    log: Arc<dyn ScanLog>,
    writer: Option<Arc<LogWriter>>,
    services: Arc<dyn Services>,
}

impl Scanner {
    /// Validate the request, record the scan and load its plugins. On
    /// return the scan is INITIALIZING and ready to [`Scanner::run`].
    pub fn new(req: ScanRequest, deps: ScanDeps) -> Result<Self, ScanError> {
        if req.name.trim().is_empty() {
            return Err(ScanError::Validation("scan name is empty".into()));
        }
        if req.scan_id.trim().is_empty() {
            return Err(ScanError::Validation("scan id is empty".into()));
        }
        if req.target_value.trim().is_empty() {
            return Err(ScanError::Validation("target value is empty".into()));
        }
        let target_type: TargetType = req
            .target_type
            .parse()
            .map_err(|_| ScanError::Validation(format!("invalid target type: {}", req.target_type)))?;
        if req.module_list.is_empty() {
            return Err(ScanError::Validation("no modules selected".into()));
        }
        if req.global_opts.is_empty() {
            return Err(ScanError::Validation("global options are empty".into()));
        }
        let cfg = GlobalConfig::from_opts(&req.global_opts).map_err(|e| ScanError::Configuration(e.to_string()))?;

        let db: SharedDb = Arc::new(Mutex::new(Db::open(&deps.db_path)?));
        db.lock().scan_instance_create(&req.scan_id, &req.name, &req.target_value, target_type.as_str())?;

        let fail = |err: ScanError| -> ScanError {
            tracing::error!(scan_id = %req.scan_id, "scan setup failed: {err}");
            if let Err(e) = db.lock().scan_instance_set(&req.scan_id, None, Some(now_ms()), Some(ScanStatus::ErrorFailed)) {
                tracing::error!(scan_id = %req.scan_id, "unable to record failure: {e}");
            }
            err
        };

        let writer = if cfg.logging {
            Some(Arc::new(LogWriter::spawn(&deps.db_path, &req.scan_id, cfg.debug).map_err(|e| fail(e.into()))?))
        } else {
            None
        };
        let log: Arc<dyn ScanLog> = match &writer {
            Some(w) => w.clone(),
            None => Arc::new(NullLog),
        };

        let mut modules: Vec<String> = Vec::new();
        for m in &req.module_list {
            if modules.contains(m) {
                continue;
            }
            if m == STORAGE_MODULE || deps.registry.get(m).is_some() {
                modules.push(m.clone());
            } else {
                let msg = format!("Module {m} not found, skipping");
                tracing::warn!(scan_id = %req.scan_id, "{msg}");
                log.log(COMPONENT, LogLevel::Warn, &msg);
            }
        }
        if !modules.iter().any(|m| m == STORAGE_MODULE) {
            modules.push(STORAGE_MODULE.to_string());
        }

        let no_opts = OptMap::new();
        let mut effective: BTreeMap<String, OptMap> = BTreeMap::new();
        for m in &modules {
            let defaults = match deps.registry.get(m) {
                Some(d) => d.opts.clone(),
                None => StoragePlugin.opts(),
            };
            effective.insert(m.clone(), merge_opts(&defaults, req.module_opts.get(m).unwrap_or(&no_opts)));
        }
        let mut flat = serialize_opts(&cfg.to_opts(), &effective, false);
        flat.insert("_modulesenabled".to_string(), modules.join(","));
        db.lock().scan_config_set(&req.scan_id, &flat).map_err(|e| fail(e.into()))?;

        let services: Arc<dyn Services> = match deps.services {
            Some(s) => s,
            None => Arc::new(SfServices::new(&cfg).map_err(|e| fail(ScanError::Configuration(e.to_string())))?),
        };
        if services.public_suffix_list().is_empty() {
            log.log(COMPONENT, LogLevel::Warn, "Internet TLD list is empty; domain checks will fail");
        }

        db.lock()
            .scan_instance_set(&req.scan_id, None, None, Some(ScanStatus::Initializing))
            .map_err(|e| fail(e.into()))?;

        let value = normalize_seed(&req.target_value, target_type);
        let target = Arc::new(RwLock::new(Target::new(&value, target_type).map_err(|e| fail(e.into()))?));

        let pool = (cfg.max_threads > 0).then(|| ThreadPool::new(cfg.max_threads, PLUGIN_QUEUE, "sharedThreadPool"));
        let stop = match &pool {
            Some(p) => p.stop_flag(),
            None => Arc::new(AtomicBool::new(false)),
        };

        let storage_opts = effective.get(STORAGE_MODULE).cloned().unwrap_or_default();
        let sink = StorageSink::new(db.clone(), &req.scan_id, &storage_opts);
        let limit = pool.is_some().then_some(OUTGOING_LIMIT);
        let bus = Arc::new(Bus::new(target_type.as_str(), sink, log.clone(), stop.clone(), limit));

        let mut slots: Vec<(i32, Arc<Slot>)> = Vec::new();
        for name in modules.iter().filter(|m| m.as_str() != STORAGE_MODULE) {
            let Some(desc) = deps.registry.get(name) else { continue };
            let mut plugin = desc.instantiate();
            plugin.clear_listeners();
            let ctx = PluginContext::new(
                name,
                &req.scan_id,
                target.clone(),
                services.clone(),
                bus.clone() as Arc<dyn EventSink>,
                log.clone(),
                stop.clone(),
            );
            let opts = effective.get(name).cloned().unwrap_or_default();
            if let Err(e) = plugin.setup(ctx.clone(), &opts) {
                let msg = format!("Module {name} initialization failed: {e}");
                tracing::error!(scan_id = %req.scan_id, "{msg}");
                log.log(COMPONENT, LogLevel::Error, &msg);
                continue;
            }
            let mut enriched = target.read().clone();
            plugin.enrich_target(&mut enriched);
            *target.write() = enriched;
            if !cfg.output_filter.is_empty() {
                ctx.set_output_filter(cfg.output_filter.clone());
            }
            if let Some(p) = &pool {
                p.set_task_concurrency(name, 1);
            }
            let priority = plugin.priority();
            slots.push((
                priority,
                Arc::new(Slot { name: name.clone(), plugin: Mutex::new(plugin), ctx, watched: desc.watched.clone() }),
            ));
        }
        slots.sort_by_key(|(p, _)| *p);

        Ok(Scanner {
            scan_id: req.scan_id,
            target,
            cfg,
            db,
            bus,
            slots: slots.into_iter().map(|(_, s)| s).collect(),
            stop,
            pool,
            log,
            writer,
            services,
        })
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle { scan_id: self.scan_id.clone(), db: self.db.clone(), stop: self.stop.clone() }
    }

    /// Names of the plugins that loaded, in delivery order.
    pub fn loaded_modules(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    fn info(&self, msg: &str) {
        tracing::info!(scan_id = %self.scan_id, "{msg}");
        self.log.log(COMPONENT, LogLevel::Info, msg);
    }

    fn set_status(&self, status: ScanStatus, started: Option<i64>, ended: Option<i64>) -> Result<(), ScanError> {
        self.db.lock().scan_instance_set(&self.scan_id, started, ended, Some(status))?;
        Ok(())
    }

    /// Drive the scan to completion and return its terminal status.
    pub fn run(mut self) -> Result<ScanStatus, ScanError> {
        let result = self.run_inner();
        let status = match &result {
            Ok(s) => *s,
            Err(e) => {
                let msg = format!("Scan [{}] failed: {e}", self.scan_id);
                tracing::error!("{msg}");
                self.log.log(COMPONENT, LogLevel::Error, &msg);
                ScanStatus::ErrorFailed
            }
        };
        if let Err(e) = self.set_status(status, None, Some(now_ms())) {
            tracing::error!(scan_id = %self.scan_id, "unable to record final status: {e}");
        }
        if let Some(w) = self.writer.take() {
            w.close();
        }
        result
    }

    fn run_inner(&mut self) -> Result<ScanStatus, ScanError> {
        // Seed events and finish() run here and must never wait on the bus.
        self.bus.set_dispatcher();
        // Plugins were wired while the scan was INITIALIZING, so STARTING
        // only marks the start time before dispatch begins.
        self.set_status(ScanStatus::Starting, Some(now_ms()), None)?;
        self.set_status(ScanStatus::Running, None, None)?;
        let (value, target_type) = {
            let t = self.target.read();
            (t.value().to_string(), t.target_type())
        };
        self.info(&format!("Scan [{}] for '{}' initiated.", self.scan_id, value));

        let root = Arc::new(Event::root(&value)?);
        self.bus.notify(root.as_ref().clone(), &[]);
        if let Some(msg) = self.bus.fatal() {
            return Err(ScanError::Fatal(msg));
        }

        if !self.slots.is_empty() {
            self.bus.notify(Event::new(target_type.as_str(), value.as_str(), crate::SEED_MODULE, &root)?, &[]);
            if target_type == TargetType::InternetName && is_domain(&value, &self.services.public_suffix_list()) {
                self.bus.notify(Event::new("DOMAIN_NAME", value.as_str(), crate::SEED_MODULE, &root)?, &[]);
            }
        }

        self.dispatch();
        if !self.stopped() {
            self.finish_plugins();
            self.dispatch();
        }

        if self.stopped() {
            self.drain_after_stop();
            self.info(&format!("Scan [{}] aborted.", self.scan_id));
            return Ok(ScanStatus::Aborted);
        }
        if let Some(pool) = self.pool.take() {
            pool.shutdown(false);
        }
        self.info(&format!("Scan [{}] completed.", self.scan_id));
        Ok(ScanStatus::Finished)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Check for a stop requested through the database.
    fn poll_abort(&self, last: &mut Instant) -> bool {
        if self.stopped() {
            return true;
        }
        if last.elapsed() < STATUS_POLL {
            return false;
        }
        *last = Instant::now();
        let status = self.db.lock().scan_status(&self.scan_id);
        match status {
            Ok(Some(ScanStatus::AbortRequested)) => {
                self.info(&format!("Scan [{}] stop requested.", self.scan_id));
                self.stop.store(true, Ordering::SeqCst);
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(scan_id = %self.scan_id, "status poll failed: {e}");
                false
            }
        }
    }

    fn listeners(&self, event: &Event) -> Vec<Arc<Slot>> {
        self.slots.iter().filter(|s| s.wants(event)).cloned().collect()
    }

    /// Deliver queued events until the scan is quiet or stopped.
    fn dispatch(&self) {
        let mut last_poll = Instant::now();
        let Some(pool) = &self.pool else {
            // Direct mode: deliver on this thread, one event at a time.
            while !self.poll_abort(&mut last_poll) {
                let Some(event) = self.bus.pop() else { break };
                for slot in self.listeners(&event) {
                    deliver(&self.bus, &slot, &event);
                }
            }
            return;
        };

        let mut idle_checks = 0;
        while !self.poll_abort(&mut last_poll) {
            if let Some(event) = self.bus.pop() {
                idle_checks = 0;
                for slot in self.listeners(&event) {
                    let (b, s, e) = (self.bus.clone(), slot.clone(), event.clone());
                    self.bus.set_blocked_on(Some(&slot.name));
                    let accepted = pool.submit(&slot.name, None, false, move || deliver(&b, &s, &e));
                    self.bus.set_blocked_on(None);
                    if !accepted {
                        break;
                    }
                }
                continue;
            }
            if pool.is_finished() && self.bus.pending() == 0 {
                idle_checks += 1;
                if idle_checks >= 2 {
                    break;
                }
                std::thread::sleep(IDLE_TICK);
            } else {
                idle_checks = 0;
                std::thread::sleep(BUSY_TICK);
            }
        }
    }

    fn finish_plugins(&self) {
        for slot in &self.slots {
            if slot.ctx.error_state() {
                continue;
            }
            let mut plugin = slot.plugin.lock();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| plugin.finish())) {
                slot.ctx.error(&format!("Module {} panicked while finishing: {}", slot.name, panic_message(payload.as_ref())));
            }
        }
    }

    /// Give in-flight deliveries up to `_aborttimeout` seconds to return.
    fn drain_after_stop(&mut self) {
        let Some(pool) = self.pool.take() else { return };
        pool.set_stop();
        let deadline = Instant::now() + Duration::from_secs(self.cfg.abort_timeout);
        while !pool.is_finished() && Instant::now() < deadline {
            std::thread::sleep(BUSY_TICK);
        }
        if pool.is_finished() {
            pool.shutdown(false);
        } else {
            let msg = format!("Modules still running after {}s; abandoning them", self.cfg.abort_timeout);
            tracing::warn!(scan_id = %self.scan_id, "{msg}");
            self.log.log(COMPONENT, LogLevel::Warn, &msg);
            let _ = std::thread::Builder::new()
                .name(format!("sf-reaper-{}", self.scan_id))
                .spawn(move || drop(pool));
        }
    }
}

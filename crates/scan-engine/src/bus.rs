//! Accepts events from plugins, persists them and queues them for fan-out.

use crate::sink::StorageSink;
use parking_lot::{Condvar, Mutex};
use spiderfoot_core::{Event, EventSink, LogLevel, ScanLog, ROOT_TYPE};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) const COMPONENT: &str = "SpiderFoot";

/// Re-check interval for a producer waiting on a full queue.
const FULL_WAIT: Duration = Duration::from_millis(50);

pub(crate) struct Bus {
    target_type: String,
    sink: StorageSink,
    log: Arc<dyn ScanLog>,
    stop: Arc<AtomicBool>,
    seen: Mutex<HashSet<String>>,
    outgoing: Mutex<VecDeque<Arc<Event>>>,
    /// Signalled whenever the dispatcher takes an event or changes what it
    /// is blocked on.
    drained: Condvar,
    /// Queue length at which emitting plugins wait. `None` never waits.
    limit: Option<usize>,
    dispatcher: Mutex<Option<ThreadId>>,
    /// Plugin whose full input queue the dispatcher is waiting on.
    blocked_on: Mutex<Option<String>>,
    /// Plugins currently inside `handle_event`, by name.
    running: Mutex<HashMap<String, usize>>,
    fatal: Mutex<Option<String>>,
}

impl Bus {
    pub(crate) fn new(
        target_type: &str,
        sink: StorageSink,
        log: Arc<dyn ScanLog>,
        stop: Arc<AtomicBool>,
        limit: Option<usize>,
    ) -> Self {
        Bus {
            target_type: target_type.to_string(),
            sink,
            log,
            stop,
            seen: Mutex::new(HashSet::new()),
            outgoing: Mutex::new(VecDeque::new()),
            drained: Condvar::new(),
            limit,
            dispatcher: Mutex::new(None),
            blocked_on: Mutex::new(None),
            running: Mutex::new(HashMap::new()),
            fatal: Mutex::new(None),
        }
    }

    /// Marks the calling thread as the dispatcher. Its own emissions (seed
    /// events, `finish`) never wait, since nothing else would drain them.
    pub(crate) fn set_dispatcher(&self) {
        *self.dispatcher.lock() = Some(thread::current().id());
    }

    /// Next event awaiting fan-out, oldest first.
    pub(crate) fn pop(&self) -> Option<Arc<Event>> {
        let mut q = self.outgoing.lock();
        let event = q.pop_front();
        if event.is_some() {
            self.drained.notify_all();
        }
        event
    }

    /// Records that the dispatcher is (or no longer is) blocked handing an
    /// event to `plugin`. That plugin may then emit past the limit.
    pub(crate) fn set_blocked_on(&self, plugin: Option<&str>) {
        *self.blocked_on.lock() = plugin.map(str::to_string);
        let _q = self.outgoing.lock();
        self.drained.notify_all();
    }

    pub(crate) fn enter(&self, plugin: &str) {
        *self.running.lock().entry(plugin.to_string()).or_default() += 1;
    }

    pub(crate) fn leave(&self, plugin: &str) {
        let mut running = self.running.lock();
        if let Some(n) = running.get_mut(plugin) {
            *n -= 1;
            if *n == 0 {
                running.remove(plugin);
            }
        }
    }

    /// A producer waits on a full queue only while the dispatcher can still
    /// make progress: it is not the dispatcher itself, and the plugin the
    /// dispatcher is blocked on is some other plugin that is running.
    fn may_exceed(&self, module: &str) -> bool {
        if self.stop.load(Ordering::SeqCst) || *self.dispatcher.lock() == Some(thread::current().id()) {
            return true;
        }
        match self.blocked_on.lock().as_deref() {
            Some(p) => p == module || !self.running.lock().contains_key(p),
            None => false,
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.outgoing.lock().len()
    }

    /// Set when ROOT could not be stored.
    pub(crate) fn fatal(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
        self.log.log(COMPONENT, LogLevel::Debug, msg);
    }

    fn accept(&self, event: Event, output_filter: &[String]) {
        let etype = event.event_type();
        if !output_filter.is_empty()
            && etype != ROOT_TYPE
            && etype != self.target_type
            && !output_filter.iter().any(|t| t == etype)
        {
            return;
        }
        if event.data().is_empty() {
            self.debug(&format!("{} from {} has no data, dropping", etype, event.module()));
            return;
        }
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        if !self.seen.lock().insert(event.hash().to_string()) {
            self.debug(&format!("duplicate {} event from {}, not re-delivering", etype, event.module()));
            return;
        }
        if let Err(e) = self.sink.store(&event) {
            let msg = format!("unable to store {} event: {e}", etype);
            tracing::error!(event_type = %etype, "{msg}");
            self.log.log(COMPONENT, LogLevel::Error, &msg);
            if event.is_root() {
                *self.fatal.lock() = Some(msg);
                return;
            }
        }
        if event.repeats_ancestor() {
            self.debug(&format!("{} \"{}\" repeats an ancestor, stored only", etype, event.data()));
            return;
        }
        let mut q = self.outgoing.lock();
        if let Some(limit) = self.limit {
            while q.len() >= limit && !self.may_exceed(event.module()) {
                self.drained.wait_for(&mut q, FULL_WAIT);
            }
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
        }
        q.push_back(Arc::new(event));
    }
}

impl EventSink for Bus {
    fn notify(&self, event: Event, output_filter: &[String]) {
        self.accept(event, output_filter);
    }
}

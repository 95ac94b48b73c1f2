//! Fixed set of worker threads pulling from per-task FIFO queues.
//!
//! Each task name (by convention a plugin name) gets its own queue.
//! Workers visit the queues round-robin, so one busy plugin cannot starve
//! the others. A queue may be capped to a number of concurrently running
//! jobs; a cap of one gives single-inflight, in-order execution.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const IDLE_WAIT: Duration = Duration::from_millis(50);

type Job<T> = Box<dyn FnOnce() -> Option<T> + Send + 'static>;

struct Queued<T> {
    job: Job<T>,
    save_result: bool,
}

struct TaskQueue<T> {
    jobs: VecDeque<Queued<T>>,
    running: usize,
    concurrency: Option<usize>,
}

impl<T> TaskQueue<T> {
    fn new() -> Self {
        TaskQueue { jobs: VecDeque::new(), running: 0, concurrency: None }
    }

    fn runnable(&self) -> bool {
        !self.jobs.is_empty() && self.concurrency.map_or(true, |c| self.running < c)
    }
}

struct State<T> {
    queues: HashMap<String, TaskQueue<T>>,
    order: Vec<String>,
    cursor: usize,
    results: HashMap<String, Vec<T>>,
    shutdown: bool,
}

impl<T> State<T> {
    fn queue_mut(&mut self, name: &str) -> &mut TaskQueue<T> {
        if !self.queues.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.queues.entry(name.to_string()).or_insert_with(TaskQueue::new)
    }

    fn pending(&self, name: &str) -> usize {
        self.queues.get(name).map_or(0, |q| q.jobs.len() + q.running)
    }

    fn next_job(&mut self) -> Option<(String, Queued<T>)> {
        let n = self.order.len();
        for i in 0..n {
            let idx = (self.cursor + i) % n;
            let name = &self.order[idx];
            let Some(q) = self.queues.get_mut(name) else { continue };
            if q.runnable() {
                if let Some(job) = q.jobs.pop_front() {
                    q.running += 1;
                    self.cursor = (idx + 1) % n;
                    return Some((name.clone(), job));
                }
            }
        }
        None
    }

    fn idle(&self) -> bool {
        self.queues.values().all(|q| q.jobs.is_empty() && q.running == 0)
    }
}

struct Inner<T> {
    name: String,
    qsize: usize,
    state: Mutex<State<T>>,
    work_ready: Condvar,
    slot_free: Condvar,
    stop: Arc<AtomicBool>,
    feeders: AtomicUsize,
}

impl<T: Send + 'static> Inner<T> {
    fn submit(&self, task_name: &str, max_threads: usize, save_result: bool, job: Job<T>) -> bool {
        let mut st = self.state.lock();
        while st.pending(task_name) >= max_threads.max(1) {
            if st.shutdown || self.stop.load(Ordering::SeqCst) {
                return false;
            }
            self.slot_free.wait_for(&mut st, IDLE_WAIT);
        }
        if st.shutdown || self.stop.load(Ordering::SeqCst) {
            return false;
        }
        st.queue_mut(task_name).jobs.push_back(Queued { job, save_result });
        drop(st);
        self.work_ready.notify_one();
        true
    }

    fn work(self: Arc<Self>, worker: usize) {
        loop {
            let (task, queued) = {
                let mut st = self.state.lock();
                loop {
                    if st.shutdown {
                        return;
                    }
                    if let Some(next) = st.next_job() {
                        break next;
                    }
                    self.work_ready.wait_for(&mut st, IDLE_WAIT);
                }
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(queued.job));
            let mut st = self.state.lock();
            if let Some(q) = st.queues.get_mut(&task) {
                q.running = q.running.saturating_sub(1);
            }
            match outcome {
                Ok(Some(result)) if queued.save_result => {
                    st.results.entry(task.clone()).or_default().push(result);
                }
                Ok(_) => {}
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(pool = %self.name, worker, task = %task, "task panicked: {msg}");
                }
            }
            drop(st);
            self.slot_free.notify_all();
            self.work_ready.notify_all();
        }
    }
}

pub struct ThreadPool<T: Send + 'static = ()> {
    inner: Arc<Inner<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    /// Start `threads` workers. `qsize` is the default per-task limit on
    /// queued plus running jobs before `submit` blocks.
    pub fn new(threads: usize, qsize: usize, name: &str) -> Self {
        let inner = Arc::new(Inner {
            name: name.to_string(),
            qsize: qsize.max(1),
            state: Mutex::new(State {
                queues: HashMap::new(),
                order: Vec::new(),
                cursor: 0,
                results: HashMap::new(),
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            slot_free: Condvar::new(),
            stop: Arc::new(AtomicBool::new(false)),
            feeders: AtomicUsize::new(0),
        });
        let threads = threads.max(1);
        tracing::debug!(pool = %name, threads, "starting thread pool");
        let workers = (0..threads)
            .filter_map(|i| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("{name}_worker_{}", i + 1))
                    .spawn(move || inner.work(i + 1))
                    .map_err(|e| tracing::error!(pool = %name, "failed to spawn worker: {e}"))
                    .ok()
            })
            .collect();
        ThreadPool { inner, workers }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.stop)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn set_stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.slot_free.notify_all();
    }

    /// Limit how many jobs of `task_name` may run at once.
    pub fn set_task_concurrency(&self, task_name: &str, n: usize) {
        self.inner.state.lock().queue_mut(task_name).concurrency = Some(n.max(1));
    }

    /// Queue a job. Blocks while `task_name` already has `max_threads`
    /// (default: the pool's qsize) jobs queued or running. Returns false
    /// if the pool is stopping and the job was dropped.
    pub fn submit<F>(&self, task_name: &str, max_threads: Option<usize>, save_result: bool, job: F) -> bool
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let max = max_threads.unwrap_or(self.inner.qsize);
        self.inner.submit(task_name, max, save_result, Box::new(move || Some(job())))
    }

    /// Run `f` over `items` on the pool; results arrive as jobs complete.
    pub fn map<I, R, F>(&self, task_name: &str, items: I, f: F) -> mpsc::IntoIter<R>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Send + 'static,
        R: Send + 'static,
        F: Fn(I::Item) -> R + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel::<R>();
        let inner = Arc::clone(&self.inner);
        let f = Arc::new(f);
        let task = task_name.to_string();
        inner.feeders.fetch_add(1, Ordering::SeqCst);
        let feeder = thread::Builder::new().name(format!("{}_feeder", inner.name)).spawn({
            let inner = Arc::clone(&inner);
            move || {
                for item in items {
                    if inner.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let tx = tx.clone();
                    let f = Arc::clone(&f);
                    inner.submit(
                        &task,
                        inner.qsize,
                        false,
                        Box::new(move || {
                            let _ = tx.send(f(item));
                            None
                        }),
                    );
                }
                inner.feeders.fetch_sub(1, Ordering::SeqCst);
            }
        });
        if let Err(e) = feeder {
            inner.feeders.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(pool = %inner.name, "failed to spawn feeder: {e}");
        }
        rx.into_iter()
    }

    /// Queued plus running jobs for one task.
    pub fn count_queued(&self, task_name: &str) -> usize {
        self.inner.state.lock().pending(task_name)
    }

    /// Per-task (queued, running) counts for tasks with outstanding work.
    pub fn queue_stats(&self) -> Vec<(String, usize, usize)> {
        let st = self.inner.state.lock();
        st.order
            .iter()
            .filter_map(|n| st.queues.get(n).map(|q| (n.clone(), q.jobs.len(), q.running)))
            .filter(|(_, q, r)| q + r > 0)
            .collect()
    }

    /// No feeder alive, nothing queued, nothing running.
    pub fn is_finished(&self) -> bool {
        self.inner.feeders.load(Ordering::SeqCst) == 0 && self.inner.state.lock().idle()
    }

    /// Drain saved results for a task.
    pub fn results(&self, task_name: &str) -> Vec<T> {
        self.inner.state.lock().results.remove(task_name).unwrap_or_default()
    }

    /// Stop the pool and hand back every saved result by task name.
    /// With `wait`, outstanding work finishes first.
    pub fn shutdown(mut self, wait: bool) -> HashMap<String, Vec<T>> {
        if wait {
            while !self.is_finished() && !self.is_stopped() {
                thread::sleep(IDLE_WAIT);
            }
        }
        self.halt();
        std::mem::take(&mut self.inner.state.lock().results)
    }

    fn halt(&mut self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        {
            let mut st = self.inner.state.lock();
            st.shutdown = true;
            for q in st.queues.values_mut() {
                q.jobs.clear();
            }
        }
        self.inner.work_ready.notify_all();
        self.inner.slot_free.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
        tracing::debug!(pool = %self.inner.name, "thread pool stopped");
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.halt();
        }
    }
}

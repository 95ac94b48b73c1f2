//! Per-scan log sink. Lines are queued on an unbounded channel and written
//! in batches by one dedicated thread holding its own connection.

use crate::models::LogEntry;
use crate::{now_ms, Db};
use spiderfoot_core::{LogLevel, ScanLog};
use std::path::Path;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

pub const BATCH: usize = 5;
pub const DEBUG_BATCH: usize = 100;

pub struct LogWriter {
    scan_id: String,
    debug: bool,
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<LogEntry>>>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LogWriter {
    /// `debug` lifts the batch size and lets DEBUG lines through.
    pub fn spawn(db_path: impl AsRef<Path>, scan_id: &str, debug: bool) -> crate::Result<Self> {
        let db = Db::open(db_path)?;
        let batch = if debug { DEBUG_BATCH } else { BATCH };
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEntry>();
        let handle = std::thread::Builder::new()
            .name(format!("sf-log-{scan_id}"))
            .spawn(move || {
                let mut pending = Vec::with_capacity(batch);
                while let Some(entry) = rx.blocking_recv() {
                    pending.push(entry);
                    if pending.len() >= batch {
                        flush(&db, &mut pending);
                    }
                }
                flush(&db, &mut pending);
            })?;
        Ok(LogWriter {
            scan_id: scan_id.to_string(),
            debug,
            tx: parking_lot::Mutex::new(Some(tx)),
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Flush pending lines and stop the writer thread. Later lines are
    /// discarded.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Some(h) = self.handle.lock().take() {
            if h.join().is_err() {
                tracing::error!(scan = %self.scan_id, "log writer thread panicked");
            }
        }
    }
}

fn flush(db: &Db, pending: &mut Vec<LogEntry>) {
    if pending.is_empty() {
        return;
    }
    match db.scan_log_events(pending) {
        Ok(true) => {}
        Ok(false) => {}
        Err(e) => tracing::warn!(entries = pending.len(), "scan log write failed: {e}"),
    }
    pending.clear();
}

impl ScanLog for LogWriter {
    fn log(&self, component: &str, level: LogLevel, message: &str) {
        if level == LogLevel::Debug && !self.debug {
            return;
        }
        let entry = LogEntry {
            scan_id: self.scan_id.clone(),
            component: component.to_string(),
            level,
            message: message.to_string(),
            generated: now_ms(),
        };
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(entry);
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_flushed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sf.db");
        let db = Db::open(&path).unwrap();
        db.scan_instance_create("ABCD1234", "t", "example.com", "INTERNET_NAME").unwrap();

        let w = LogWriter::spawn(&path, "ABCD1234", false).unwrap();
        for i in 0..7 {
            w.log("SpiderFoot", LogLevel::Info, &format!("line {i}"));
        }
        w.log("sfp_x", LogLevel::Debug, "hidden");
        w.close();
        w.log("SpiderFoot", LogLevel::Error, "after close");

        let rows = db.scan_logs("ABCD1234", None, None, true).unwrap();
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|r| r.level == "STATUS"));
    }
}

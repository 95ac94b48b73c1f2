//! Echoes scan events to standard output while a scan runs. Plugins run on
//! pool threads, so lines are handed to one writer thread that owns stdout.

use serde_json::json;
use spiderfoot_core::event_types;
use spiderfoot_core::plugin::str_list;
use spiderfoot_core::{Event, OptMap, OptMapExt, Plugin, PluginContext, PluginError, PluginMeta, ROOT_TYPE};
use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

pub const STDOUT_MODULE: &str = "sfp__stor_stdout";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineFormat {
    #[default]
    Tab,
    Csv,
    /// One array spanning the whole scan.
    Json,
    Jsonl,
}

impl LineFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineFormat::Tab => "tab",
            LineFormat::Csv => "csv",
            LineFormat::Json => "json",
            LineFormat::Jsonl => "jsonl",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "tab" => Some(LineFormat::Tab),
            "csv" => Some(LineFormat::Csv),
            "json" => Some(LineFormat::Json),
            "jsonl" => Some(LineFormat::Jsonl),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct StdoutPlugin {
    format: LineFormat,
    requested: Vec<String>,
    only_requested: bool,
    show_source: bool,
    strip_newline: bool,
    max_length: usize,
    delimiter: u8,
    tx: Option<Sender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl StdoutPlugin {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::new(StdoutPlugin::default())
    }

    fn configure(&mut self, opts: &OptMap) -> Result<(), PluginError> {
        let format = opts.opt_str("_format", "tab");
        self.format = LineFormat::parse(&format)
            .ok_or_else(|| PluginError::Configuration(format!("unknown output format {format}")))?;
        self.requested = opts.opt_list("_requested");
        self.only_requested = opts.opt_bool("_showonlyrequested", false);
        self.show_source = opts.opt_bool("_showsource", false);
        self.strip_newline = opts.opt_bool("_stripnewline", false);
        self.max_length = opts.opt_i64("_maxlength", 0).max(0) as usize;
        let delim = opts.opt_str("_csvdelim", ",");
        self.delimiter = match delim.as_bytes() {
            [b] => *b,
            _ => return Err(PluginError::Configuration(format!("CSV delimiter must be one byte, got {delim:?}"))),
        };
        Ok(())
    }

    fn clean(&self, s: &str) -> String {
        let mut out: String = if self.strip_newline {
            s.chars().filter(|c| *c != '\n' && *c != '\r').collect()
        } else {
            s.to_string()
        };
        if self.max_length > 0 {
            out = out.chars().take(self.max_length).collect();
        }
        out
    }

    /// One output line for `event`, without the trailing newline.
    pub fn render(&self, event: &Event) -> Result<String, PluginError> {
        let descr = event_types::lookup(event.event_type()).map_or(event.event_type(), |t| t.description);
        let data = self.clean(event.data());
        let source = self.clean(event.source().map_or("", |s| s.data()));
        match self.format {
            LineFormat::Tab if self.show_source => {
                Ok(format!("{:<30}\t{:<45}\t{}\t{}", event.module(), descr, source, data))
            }
            LineFormat::Tab => Ok(format!("{:<30}\t{:<45}\t{}", event.module(), descr, data)),
            LineFormat::Csv => {
                let mut w = csv::WriterBuilder::new()
                    .delimiter(self.delimiter)
                    .terminator(csv::Terminator::Any(b'\n'))
                    .from_writer(Vec::new());
                w.write_record([event.module(), descr, source.as_str(), data.as_str()])
                    .map_err(|e| PluginError::Internal(e.to_string()))?;
                let bytes = w.into_inner().map_err(|e| PluginError::Internal(e.to_string()))?;
                let line = String::from_utf8_lossy(&bytes);
                Ok(line.trim_end_matches('\n').to_string())
            }
            LineFormat::Json | LineFormat::Jsonl => {
                let v = json!({
                    "generated": event.generated(),
                    "type": descr,
                    "data": data,
                    "module": event.module(),
                    "source": source,
                });
                serde_json::to_string(&v).map_err(|e| PluginError::Internal(e.to_string()))
            }
        }
    }

    fn spawn_writer(&mut self) -> Result<(), PluginError> {
        let (tx, rx) = mpsc::channel::<String>();
        let json_array = self.format == LineFormat::Json;
        let handle = std::thread::Builder::new()
            .name("sf-stdout".into())
            .spawn(move || {
                let mut out = BufWriter::new(io::stdout().lock());
                if let Err(e) = pump(rx, &mut out, json_array) {
                    tracing::debug!("stdout writer stopped: {e}");
                }
            })
            .map_err(|e| PluginError::Internal(format!("unable to start stdout writer: {e}")))?;
        self.tx = Some(tx);
        self.writer = Some(handle);
        Ok(())
    }
}

/// Writes lines until every sender is gone, flushing whenever the queue
/// drains.
pub fn pump<W: Write>(rx: Receiver<String>, out: &mut W, json_array: bool) -> io::Result<()> {
    let mut first = true;
    let mut put = |out: &mut W, line: &str| -> io::Result<()> {
        if json_array {
            out.write_all(if first { b"[" } else { b",\n" })?;
            out.write_all(line.as_bytes())?;
        } else {
            writeln!(out, "{line}")?;
        }
        first = false;
        Ok(())
    };
    while let Ok(line) = rx.recv() {
        put(out, &line)?;
        while let Ok(more) = rx.try_recv() {
            put(out, &more)?;
        }
        out.flush()?;
    }
    if json_array {
        out.write_all(if first { b"[]\n" } else { b"]\n" })?;
    }
    out.flush()
}

impl Plugin for StdoutPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: STDOUT_MODULE,
            summary: "Dumps output to standard out. Used for when a SpiderFoot scan is run via the command-line.",
            flags: &[],
            use_cases: &[],
            categories: &[],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        OptMap::from([
            ("_format".to_string(), json!("tab")),
            ("_requested".to_string(), json!([])),
            ("_showonlyrequested".to_string(), json!(false)),
            ("_stripnewline".to_string(), json!(false)),
            ("_showsource".to_string(), json!(false)),
            ("_csvdelim".to_string(), json!(",")),
            ("_maxlength".to_string(), json!(0)),
        ])
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("_format".to_string(), "Output format: tab, csv, json or jsonl.".to_string()),
            ("_requested".to_string(), "Event types requested on the command line.".to_string()),
            ("_showonlyrequested".to_string(), "Only print events of the requested types.".to_string()),
            ("_stripnewline".to_string(), "Remove line breaks from event data.".to_string()),
            ("_showsource".to_string(), "Include the source event's data.".to_string()),
            ("_csvdelim".to_string(), "Delimiter for CSV output.".to_string()),
            ("_maxlength".to_string(), "Truncate data to this many characters (0 = unlimited).".to_string()),
        ])
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&["*"])
    }

    fn produced_events(&self) -> Vec<String> {
        Vec::new()
    }

    fn setup(&mut self, _ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.configure(user_opts)?;
        self.spawn_writer()
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        if event.event_type() == ROOT_TYPE {
            return Ok(());
        }
        if self.only_requested && !self.requested.iter().any(|t| t == event.event_type()) {
            return Ok(());
        }
        let line = self.render(event)?;
        let tx = self.tx.as_ref().ok_or_else(|| PluginError::Internal("stdout writer not started".into()))?;
        tx.send(line).map_err(|_| PluginError::Internal("stdout writer has stopped".into()))
    }
}

impl Drop for StdoutPlugin {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiderfoot_core::plugin::merge_opts;

    fn plugin(overrides: OptMap) -> StdoutPlugin {
        let mut p = StdoutPlugin::default();
        let opts = merge_opts(&p.opts(), &overrides);
        p.configure(&opts).unwrap();
        p
    }

    fn sample() -> Event {
        let root = Arc::new(Event::root("example.com").unwrap());
        let name = Arc::new(Event::new("INTERNET_NAME", "www.example.com", "sfp_dnsresolve", &root).unwrap());
        Event::new("IP_ADDRESS", "192.0.2.1", "sfp_dnsresolve", &name).unwrap()
    }

    #[test]
    fn tab_lines_use_type_descriptions() {
        let p = plugin(OptMap::new());
        let line = p.render(&sample()).unwrap();
        let cols: Vec<&str> = line.split('\t').collect();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0].trim_end(), "sfp_dnsresolve");
        assert_eq!(cols[1].trim_end(), "IP Address");
        assert_eq!(cols[2], "192.0.2.1");

        let p = plugin(OptMap::from([("_showsource".to_string(), json!(true))]));
        let line = p.render(&sample()).unwrap();
        assert_eq!(line.split('\t').nth(2), Some("www.example.com"));
    }

    #[test]
    fn csv_quotes_fields() {
        let p = plugin(OptMap::from([
            ("_format".to_string(), json!("csv")),
            ("_csvdelim".to_string(), json!(";")),
        ]));
        let root = Arc::new(Event::root("example.com").unwrap());
        let ev = Event::new("RAW_RIR_DATA", "a;b", "sfp_test", &root).unwrap();
        assert_eq!(p.render(&ev).unwrap(), "sfp_test;Raw Data from RIRs/APIs;example.com;\"a;b\"");
    }

    #[test]
    fn json_lines_and_truncation() {
        let p = plugin(OptMap::from([
            ("_format".to_string(), json!("jsonl")),
            ("_maxlength".to_string(), json!(4)),
        ]));
        let v: serde_json::Value = serde_json::from_str(&p.render(&sample()).unwrap()).unwrap();
        assert_eq!(v["data"], "192.");
        assert_eq!(v["source"], "www.");
        assert_eq!(v["type"], "IP Address");
    }

    #[test]
    fn strips_newlines() {
        let p = plugin(OptMap::from([("_stripnewline".to_string(), json!(true))]));
        let root = Arc::new(Event::root("example.com").unwrap());
        let ev = Event::new("RAW_RIR_DATA", "a\r\nb", "sfp_test", &root).unwrap();
        assert!(p.render(&ev).unwrap().ends_with("\tab"));
    }

    #[test]
    fn rejects_bad_options() {
        let mut p = StdoutPlugin::default();
        let opts = merge_opts(&p.opts(), &OptMap::from([("_format".to_string(), json!("xml"))]));
        assert!(matches!(p.configure(&opts), Err(PluginError::Configuration(_))));
        let opts = merge_opts(&p.opts(), &OptMap::from([("_csvdelim".to_string(), json!(",,"))]));
        assert!(matches!(p.configure(&opts), Err(PluginError::Configuration(_))));
    }

    #[test]
    fn pump_wraps_json_arrays() {
        let (tx, rx) = mpsc::channel();
        tx.send("{\"a\":1}".to_string()).unwrap();
        tx.send("{\"a\":2}".to_string()).unwrap();
        drop(tx);
        let mut out = Vec::new();
        pump(rx, &mut out, true).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v.as_array().map(Vec::len), Some(2));

        let (tx, rx) = mpsc::channel::<String>();
        drop(tx);
        let mut out = Vec::new();
        pump(rx, &mut out, true).unwrap();
        assert_eq!(out, b"[]\n");
    }

    #[test]
    fn pump_writes_plain_lines() {
        let (tx, rx) = mpsc::channel();
        tx.send("one".to_string()).unwrap();
        tx.send("two".to_string()).unwrap();
        drop(tx);
        let mut out = Vec::new();
        pump(rx, &mut out, false).unwrap();
        assert_eq!(out, b"one\ntwo\n");
    }
}

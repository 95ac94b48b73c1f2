use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use correlate::{bundled_rules, load_rules, Correlator};
use results_sqlite::export::{events_csv, events_json, format_timestamp, read_records, records_json, ScanRows};
use results_sqlite::graph::{graph_gexf, graph_json};
use results_sqlite::{Db, EventQuery, ResultRow};
use scan_engine::{stop_scan, ScanDeps, ScanRequest, Scanner, STORAGE_MODULE};
use serde_json::json;
use spiderfoot_core::{event_types, target_type_from_string, OptMap, OptMapExt, PluginRegistry, ScanStatus};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

mod config;
mod output;

use output::{LineFormat, StdoutPlugin, STDOUT_MODULE};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl, Csv }

impl OutputFormat {
    fn line_format(self) -> LineFormat {
        match self {
            OutputFormat::Text => LineFormat::Tab,
            OutputFormat::Json => LineFormat::Json,
            OutputFormat::Jsonl => LineFormat::Jsonl,
            OutputFormat::Csv => LineFormat::Csv,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ListFormat { Text, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
    Gexf,
    GraphJson,
    Parquet,
    /// Every stored field, ROOT included; what `import` reads
    Records,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat { Text, Json }

#[derive(Debug, Parser)]
#[command(name = "spiderfoot", version, about = "OSINT scan engine")]
struct Cli {
    /// Config file (YAML). If omitted, loads ./spiderfoot.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Scan database; overrides `__database` from the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset (e.g. info, debug, scan_engine=trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run a scan against one target and wait for it to finish
    Scan {
        /// Target: domain, IP, netblock, e-mail, ASN, phone, "Human Name" or "username"
        #[arg(short = 't', long)]
        target: String,
        /// Target type (e.g. INTERNET_NAME); inferred from the target when omitted
        #[arg(long = "type")]
        target_type: Option<String>,
        /// Modules to run (comma-separated)
        #[arg(short = 'm', long, value_delimiter = ',', conflicts_with = "types")]
        modules: Vec<String>,
        /// Run the modules able to produce these event types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        /// Scan name; defaults to the target
        #[arg(long)]
        name: Option<String>,
        /// Skip the correlation pass after the scan
        #[arg(long)]
        no_correlate: bool,
        /// Only propagate events of these types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        output_filter: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Include the source event's data in each line
        #[arg(long)]
        show_source: bool,
        /// Remove line breaks from event data
        #[arg(long)]
        strip_newlines: bool,
        /// Truncate event data to this many characters
        #[arg(long)]
        max_length: Option<usize>,
        /// Max modules running concurrently (0 delivers on the scan thread)
        #[arg(long)]
        max_threads: Option<usize>,
        /// Do not echo events to stdout
        #[arg(short = 'q', long)]
        quiet: bool,
    },
    /// Request that a running scan stop
    Stop { scan_id: String },
    /// List scans in the database
    List {
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
    /// Delete scans and everything stored for them
    Delete {
        #[arg(required = true)]
        scan_ids: Vec<String>,
    },
    /// Export stored events
    Export {
        #[arg(required = true)]
        scan_ids: Vec<String>,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output file; stdout when omitted (required for parquet)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Load a `--format records` export into a new scan
    Import {
        input: PathBuf,
        /// Scan name; the seed when omitted
        #[arg(short = 'n', long)]
        name: Option<String>,
        /// Seed type; detected from the ROOT event when omitted
        #[arg(long = "type")]
        target_type: Option<String>,
    },
    /// Run correlation rules over a finished scan
    Correlate {
        scan_id: String,
        /// Directory of YAML rules; the bundled rules when omitted
        #[arg(long)]
        rules: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
    /// Show a scan's log, oldest line first
    Logs {
        scan_id: String,
        /// Most recent N lines
        #[arg(long)]
        limit: Option<usize>,
        /// Only ERROR lines
        #[arg(long)]
        errors: bool,
    },
    /// List known event types
    Types {
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
    /// List available modules
    Modules {
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("logging init failed: {e}"))
}

fn build_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(StdoutPlugin::boxed);
    #[cfg(feature = "dns")]
    host_discovery::register(&mut registry);
    #[cfg(feature = "web")]
    web_surface::register(&mut registry);
    #[cfg(feature = "errors")]
    error_strings::register(&mut registry);
    #[cfg(feature = "hashes")]
    credentials::register(&mut registry);
    #[cfg(feature = "portscan")]
    port_scan::register(&mut registry);
    registry
}

/// Modules for a scan: the named ones, or those producing `types` plus,
/// transitively, the producers of whatever they watch. Neither given means
/// every collector.
fn select_modules(registry: &PluginRegistry, modules: &[String], types: &[String]) -> Result<Vec<String>> {
    if !modules.is_empty() {
        for m in modules {
            if m != STORAGE_MODULE && registry.get(m).is_none() {
                bail!("unknown module {m}; see `spiderfoot modules`");
            }
        }
        return Ok(modules.iter().filter(|m| m.as_str() != STDOUT_MODULE).cloned().collect());
    }
    if types.is_empty() {
        return Ok(registry.names().filter(|n| *n != STDOUT_MODULE).map(str::to_string).collect());
    }
    for t in types {
        if !event_types::is_known(t) {
            bail!("unknown event type {t}; see `spiderfoot types`");
        }
    }
    let wanted: Vec<&str> = types.iter().map(String::as_str).collect();
    let mut selected: BTreeSet<String> = registry.modules_producing(&wanted).into_iter().collect();
    loop {
        let mut needed: BTreeSet<String> = BTreeSet::new();
        for m in &selected {
            if let Some(d) = registry.get(m) {
                needed.extend(d.watched.iter().filter(|w| w.as_str() != "*").cloned());
            }
        }
        let needed: Vec<&str> = needed.iter().map(String::as_str).collect();
        let before = selected.len();
        selected.extend(registry.modules_producing(&needed));
        if selected.len() == before {
            break;
        }
    }
    selected.remove(STDOUT_MODULE);
    if selected.is_empty() {
        bail!("no module produces {}", types.join(", "));
    }
    Ok(selected.into_iter().collect())
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn require_scan(db: &Db, scan_id: &str) -> Result<results_sqlite::ScanInstance> {
    db.scan_instance_get(scan_id)?.ok_or_else(|| anyhow!("no scan with id {scan_id}"))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(File::create(p).with_context(|| format!("creating {}", p.display()))?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    let mut global = cfg.global_opts()?;
    if let Some(db) = &cli.db {
        global.insert("__database".into(), json!(db.display().to_string()));
    }
    let default_level = if global.opt_bool("_debug", false) { "debug" } else { "info" };
    init_tracing(cli.log_level.as_deref().unwrap_or(default_level), cli.log_format)?;
    let db_path = config::database_path(&global);

    match cli.command {
        Commands::Version => {
            println!("spiderfoot {}", spiderfoot_core::version());
        }
        Commands::Scan {
            target,
            target_type,
            modules,
            types,
            name,
            no_correlate,
            output_filter,
            format,
            show_source,
            strip_newlines,
            max_length,
            max_threads,
            quiet,
        } => {
            let target_type = match target_type {
                Some(t) => t,
                None => target_type_from_string(&target)
                    .ok_or_else(|| anyhow!("could not determine the type of {target}; pass --type"))?
                    .as_str()
                    .to_string(),
            };
            let registry = build_registry();
            let mut module_list = select_modules(&registry, &modules, &types)?;
            if !quiet {
                module_list.push(STDOUT_MODULE.to_string());
            }

            if !output_filter.is_empty() {
                global.insert("__outputfilter".into(), json!(output_filter));
            }
            if let Some(n) = max_threads {
                global.insert("_maxthreads".into(), json!(n));
            }
            let mut module_opts = cfg.modules.clone();
            let stdout: &mut OptMap = module_opts.entry(STDOUT_MODULE.to_string()).or_default();
            stdout.insert("_format".into(), json!(format.line_format().as_str()));
            stdout.insert("_requested".into(), json!(types));
            stdout.insert("_showonlyrequested".into(), json!(!types.is_empty()));
            stdout.insert("_showsource".into(), json!(show_source));
            stdout.insert("_stripnewline".into(), json!(strip_newlines));
            if let Some(n) = max_length {
                stdout.insert("_maxlength".into(), json!(n));
            }

            let scan_id = results_sqlite::new_scan_id();
            let req = ScanRequest {
                name: name.unwrap_or_else(|| target.clone()),
                scan_id: scan_id.clone(),
                target_value: target,
                target_type,
                module_list,
                global_opts: global,
                module_opts,
            };
            let started = Instant::now();
            let scanner = Scanner::new(
                req,
                ScanDeps { db_path: db_path.clone(), registry: Arc::new(registry), services: None },
            )?;
            tracing::info!(scan_id = %scan_id, modules = ?scanner.loaded_modules(), "scan started");
            let status = scanner.run()?;
            tracing::info!(scan_id = %scan_id, status = %status, elapsed_ms = started.elapsed().as_millis() as u64, "scan ended");

            if !no_correlate && status == ScanStatus::Finished {
                let db = Db::open(&db_path)?;
                let created = Correlator::new(&db, &scan_id, bundled_rules()?)?.run()?;
                tracing::info!(scan_id = %scan_id, correlations = created, "correlation pass complete");
            }
            eprintln!("scan {scan_id} {status}");
            if status != ScanStatus::Finished {
                std::process::exit(1);
            }
        }
        Commands::Stop { scan_id } => {
            let db = Db::open(&db_path)?;
            require_scan(&db, &scan_id)?;
            if stop_scan(&db, &scan_id)? {
                println!("stop requested for {scan_id}");
            } else {
                println!("scan {scan_id} is not running");
            }
        }
        Commands::List { format } => {
            let db = Db::open(&db_path)?;
            let scans = db.scan_instance_list()?;
            match format {
                ListFormat::Json => print_json(&scans)?,
                ListFormat::Text => {
                    for s in &scans {
                        println!(
                            "{}  {:<15} {:>7}  {}  {} ({})",
                            s.scan.guid,
                            s.scan.status,
                            s.result_count,
                            format_timestamp(s.scan.created as f64 / 1000.0),
                            s.scan.name,
                            s.scan.seed_target
                        );
                    }
                }
            }
        }
        Commands::Delete { scan_ids } => {
            let db = Db::open(&db_path)?;
            for id in &scan_ids {
                let scan = require_scan(&db, id)?;
                if scan.status.parse::<ScanStatus>().map(|s| s.is_running()).unwrap_or(false) {
                    bail!("scan {id} is {}; stop it before deleting", scan.status);
                }
                db.scan_instance_delete(id)?;
                println!("deleted {id}");
            }
        }
        Commands::Export { scan_ids, format, output } => {
            let db = Db::open(&db_path)?;
            let mut scans = Vec::new();
            for id in &scan_ids {
                let scan = require_scan(&db, id)?;
                let rows: Vec<ResultRow> = db.scan_result_events(id, &EventQuery::default())?;
                scans.push((scan, rows));
            }
            match format {
                ExportFormat::Parquet => {
                    let [(scan, _)] = scans.as_slice() else {
                        bail!("parquet export takes exactly one scan");
                    };
                    let out = output.as_deref().ok_or_else(|| anyhow!("parquet export needs --output"))?;
                    let n = results_sqlite::export_parquet::export_events_to_parquet(&db.conn, &scan.guid, out)?;
                    eprintln!("wrote {n} events to {}", out.display());
                }
                ExportFormat::Csv => {
                    let mut out = open_output(output.as_deref())?;
                    let rows: Vec<ResultRow> = scans.iter().flat_map(|(_, r)| r.iter().cloned()).collect();
                    let name = (scans.len() == 1).then(|| scans[0].0.name.as_str());
                    events_csv(&rows, name, &mut out)?;
                    out.flush()?;
                }
                ExportFormat::Json => {
                    let views: Vec<ScanRows<'_>> = scans
                        .iter()
                        .map(|(s, rows)| ScanRows { name: &s.name, target: &s.seed_target, rows })
                        .collect();
                    let mut out = open_output(output.as_deref())?;
                    serde_json::to_writer_pretty(&mut out, &events_json(&views)?)?;
                    writeln!(out)?;
                    out.flush()?;
                }
                ExportFormat::Records => {
                    let mut records = Vec::new();
                    for (scan, _) in &scans {
                        records.extend(db.scan_result_records(&scan.guid)?);
                    }
                    let mut out = open_output(output.as_deref())?;
                    records_json(&records, &mut out)?;
                    writeln!(out)?;
                    out.flush()?;
                }
                ExportFormat::Gexf | ExportFormat::GraphJson => {
                    let roots: Vec<String> = scans.iter().map(|(s, _)| s.seed_target.clone()).collect();
                    let rows: Vec<ResultRow> = scans.iter().flat_map(|(_, r)| r.iter().cloned()).collect();
                    let mut out = open_output(output.as_deref())?;
                    if format == ExportFormat::Gexf {
                        let title = if scans.len() == 1 { scans[0].0.name.clone() } else { "SpiderFoot Export".to_string() };
                        out.write_all(graph_gexf(&roots, &title, &rows).as_bytes())?;
                    } else {
                        serde_json::to_writer(&mut out, &graph_json(&roots, &rows))?;
                        writeln!(out)?;
                    }
                    out.flush()?;
                }
            }
        }
        Commands::Import { input, name, target_type } => {
            let file = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let records = read_records(io::BufReader::new(file)).with_context(|| format!("reading {}", input.display()))?;
            let seed = records
                .iter()
                .find(|r| r.event_type == "ROOT")
                .map(|r| r.data.clone())
                .ok_or_else(|| anyhow!("{} has no ROOT event", input.display()))?;
            let target_type = match target_type {
                Some(t) => t,
                None => target_type_from_string(&seed)
                    .ok_or_else(|| anyhow!("could not determine the type of {seed}; pass --type"))?
                    .as_str()
                    .to_string(),
            };
            let db = Db::open(&db_path)?;
            let scan_id = results_sqlite::new_scan_id();
            let n = db.import_scan(&scan_id, name.as_deref().unwrap_or(&seed), &target_type, &records)?;
            tracing::info!(scan_id = %scan_id, events = n, "import complete");
            println!("{scan_id}");
        }
        Commands::Correlate { scan_id, rules, format } => {
            let db = Db::open(&db_path)?;
            require_scan(&db, &scan_id)?;
            let rules = match rules {
                Some(dir) => load_rules(&dir)?,
                None => bundled_rules()?,
            };
            let created = Correlator::new(&db, &scan_id, rules)?.run()?;
            tracing::info!(scan_id = %scan_id, correlations = created, "correlation pass complete");
            let found = db.scan_correlation_list(&scan_id)?;
            match format {
                ListFormat::Json => print_json(&found)?,
                ListFormat::Text => {
                    for c in &found {
                        println!("[{}] {} ({} events, rule {})", c.rule_risk, c.title, c.event_count, c.rule_id);
                    }
                    println!("{created} new, {} total", found.len());
                }
            }
        }
        Commands::Logs { scan_id, limit, errors } => {
            let db = Db::open(&db_path)?;
            require_scan(&db, &scan_id)?;
            let mut lines = if errors { db.scan_errors(&scan_id, limit)? } else { db.scan_logs(&scan_id, limit, None, false)? };
            lines.reverse();
            for l in &lines {
                println!(
                    "{} {:<5} {:<20} {}",
                    format_timestamp(l.generated as f64 / 1000.0),
                    l.level,
                    l.component,
                    l.message
                );
            }
        }
        Commands::Types { format } => {
            let types = event_types::all();
            match format {
                ListFormat::Json => {
                    let v: Vec<_> = types
                        .iter()
                        .map(|t| json!({"event": t.name, "description": t.description, "raw": t.raw, "kind": t.kind.as_str()}))
                        .collect();
                    print_json(&v)?;
                }
                ListFormat::Text => {
                    for t in types {
                        println!("{:<40} {:<11} {}", t.name, t.kind.as_str(), t.description);
                    }
                }
            }
        }
        Commands::Modules { format } => {
            let registry = build_registry();
            match format {
                ListFormat::Json => {
                    let v: Vec<_> = registry
                        .iter()
                        .map(|d| {
                            json!({
                                "name": d.name(),
                                "summary": d.meta.summary,
                                "watched": d.watched,
                                "produced": d.produced,
                                "opts": d.opts,
                                "optdescs": d.optdescs,
                            })
                        })
                        .collect();
                    print_json(&v)?;
                }
                ListFormat::Text => {
                    for d in registry.iter() {
                        println!("{:<22} {}", d.name(), d.meta.summary);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_flags() {
        let cli = Cli::try_parse_from([
            "spiderfoot", "--db", "x.db", "scan", "-t", "example.com", "-m", "sfp_dnsresolve,sfp_spider",
            "--format", "jsonl", "--no-correlate", "-q",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some(Path::new("x.db")));
        match cli.command {
            Commands::Scan { target, modules, format, no_correlate, quiet, .. } => {
                assert_eq!(target, "example.com");
                assert_eq!(modules, vec!["sfp_dnsresolve", "sfp_spider"]);
                assert_eq!(format, OutputFormat::Jsonl);
                assert!(no_correlate && quiet);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["spiderfoot", "scan", "-t", "a.com", "-m", "x", "--types", "IP_ADDRESS"]).is_err());
        assert!(Cli::try_parse_from(["spiderfoot", "export", "ABC", "--format", "graph-json"]).is_ok());
        assert!(Cli::try_parse_from(["spiderfoot", "export", "ABC", "--format", "records"]).is_ok());
        let cli = Cli::try_parse_from(["spiderfoot", "import", "scan.json", "--type", "DOMAIN_NAME"]).unwrap();
        match cli.command {
            Commands::Import { input, name, target_type } => {
                assert_eq!(input, PathBuf::from("scan.json"));
                assert_eq!(name, None);
                assert_eq!(target_type.as_deref(), Some("DOMAIN_NAME"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn every_module_registers() {
        let registry = build_registry();
        assert!(registry.get(STDOUT_MODULE).is_some());
        #[cfg(feature = "dns")]
        assert!(registry.get("sfp_dnsresolve").is_some());
        #[cfg(feature = "web")]
        assert!(registry.get("sfp_spider").is_some() && registry.get("sfp_webserver").is_some());
        #[cfg(feature = "portscan")]
        assert!(registry.get("sfp_portscan_tcp").is_some());
    }

    #[test]
    fn registered_modules_describe_options_and_types() {
        let registry = build_registry();
        for d in registry.iter() {
            let opts: Vec<&String> = d.opts.keys().collect();
            let described: Vec<&String> = d.optdescs.keys().collect();
            assert_eq!(opts, described, "{}", d.name());
            for t in &d.produced {
                assert!(event_types::is_known(t), "{} produces unknown type {t}", d.name());
            }
            for t in d.watched.iter().filter(|t| t.as_str() != "*") {
                assert!(event_types::is_known(t), "{} watches unknown type {t}", d.name());
            }
        }
    }

    #[test]
    fn selects_named_modules() {
        let registry = build_registry();
        assert!(select_modules(&registry, &["sfp_nope".into()], &[]).is_err());
        let all = select_modules(&registry, &[], &[]).unwrap();
        assert!(!all.iter().any(|m| m == STDOUT_MODULE));
        assert_eq!(all.len(), registry.len() - 1);
        assert!(select_modules(&registry, &[], &["NOT_A_TYPE".into()]).is_err());
    }

    #[cfg(all(feature = "dns", feature = "web"))]
    #[test]
    fn type_selection_pulls_in_producers_of_inputs() {
        let registry = build_registry();
        let picked = select_modules(&registry, &[], &["WEBSERVER_BANNER".into()]).unwrap();
        // the banner comes from HTTP headers, which the spider fetches
        // for names the resolver finds
        assert!(picked.contains(&"sfp_webserver".to_string()));
        assert!(picked.contains(&"sfp_spider".to_string()));
        assert!(picked.contains(&"sfp_dnsresolve".to_string()));
    }
}

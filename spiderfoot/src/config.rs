use anyhow::{bail, Context, Result};
use serde::Deserialize;
use spiderfoot_core::{GlobalConfig, OptMap, OptMapExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "spiderfoot.yaml";

/// Contents of `spiderfoot.yaml`. Keys keep their stored spelling, e.g.
/// `_fetchtimeout` or `__database`.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub global: OptMap,
    pub modules: BTreeMap<String, OptMap>,
}

/// Loads `path`, or `./spiderfoot.yaml` when present. No file means defaults;
/// a file that does not parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = PathBuf::from(DEFAULT_CONFIG);
            if !p.exists() {
                return Ok(Config::default());
            }
            p
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

impl Config {
    /// Engine defaults overlaid with the file's `global` section.
    pub fn global_opts(&self) -> Result<OptMap> {
        let mut opts = GlobalConfig::default().to_opts();
        for (k, v) in &self.global {
            if !opts.contains_key(k) {
                bail!("unknown global option {k}");
            }
            opts.insert(k.clone(), v.clone());
        }
        GlobalConfig::from_opts(&opts).context("invalid global options")?;
        Ok(opts)
    }
}

pub fn database_path(opts: &OptMap) -> PathBuf {
    PathBuf::from(opts.opt_str("__database", "spiderfoot.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_yaml(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_global_and_module_sections() {
        let f = write_yaml(
            "global:\n  _fetchtimeout: 10\n  __database: /tmp/sf.db\nmodules:\n  sfp_spider:\n    maxpages: 20\n",
        );
        let cfg = load_config(Some(f.path())).unwrap();
        assert_eq!(cfg.modules["sfp_spider"]["maxpages"], json!(20));

        let opts = cfg.global_opts().unwrap();
        assert_eq!(opts["_fetchtimeout"], json!(10));
        assert_eq!(opts["_maxthreads"], json!(3));
        assert_eq!(database_path(&opts), PathBuf::from("/tmp/sf.db"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let f = write_yaml("\n");
        assert_eq!(load_config(Some(f.path())).unwrap(), Config::default());
        let opts = Config::default().global_opts().unwrap();
        assert_eq!(database_path(&opts), PathBuf::from("spiderfoot.db"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let f = write_yaml("global: [unterminated\n");
        assert!(load_config(Some(f.path())).is_err());

        let f = write_yaml("scans:\n  a: 1\n");
        assert!(load_config(Some(f.path())).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn rejects_unknown_or_mistyped_globals() {
        let f = write_yaml("global:\n  _fetchtimeot: 10\n");
        assert!(load_config(Some(f.path())).unwrap().global_opts().is_err());

        let f = write_yaml("global:\n  _maxthreads: [1, 2]\n");
        assert!(load_config(Some(f.path())).unwrap().global_opts().is_err());
    }
}

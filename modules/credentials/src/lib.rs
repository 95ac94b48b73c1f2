//! Hex digests (MD5, SHA1, SHA256, SHA512) found in collected content.

use regex::Regex;
use spiderfoot_core::plugin::{merge_opts, str_list};
use spiderfoot_core::{Event, OptMap, Plugin, PluginContext, PluginError, PluginMeta, PluginRegistry};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const NAME: &str = "sfp_hashes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashKind {
    /// Classified by length alone.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(HashKind::Md5),
            40 => Some(HashKind::Sha1),
            64 => Some(HashKind::Sha256),
            128 => Some(HashKind::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashKind::Md5 => "MD5",
            HashKind::Sha1 => "SHA1",
            HashKind::Sha256 => "SHA256",
            HashKind::Sha512 => "SHA512",
        })
    }
}

/// Maximal runs of hex digits whose length matches a known digest.
pub fn extract_hashes(text: &str) -> Vec<(HashKind, String)> {
    static HEX: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = HEX.get_or_init(|| Regex::new(r"[a-fA-F0-9]+").ok()) else { return Vec::new() };
    re.find_iter(text)
        .filter_map(|m| HashKind::from_len(m.len()).map(|k| (k, m.as_str().to_string())))
        .collect()
}

#[derive(Default)]
pub struct SfpHashes {
    ctx: Option<PluginContext>,
    opts: OptMap,
    reported: HashSet<String>,
}

impl SfpHashes {
    pub fn boxed() -> Box<dyn Plugin> {
        Box::<SfpHashes>::default()
    }
}

impl Plugin for SfpHashes {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: NAME,
            summary: "Identify MD5 and SHA hashes in web content, files and more.",
            flags: &[],
            use_cases: &["Footprint", "Investigate", "Passive"],
            categories: &["Content Analysis"],
            data_source: None,
        }
    }

    fn opts(&self) -> OptMap {
        OptMap::new()
    }

    fn optdescs(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn watched_events(&self) -> Vec<String> {
        str_list(&["TARGET_WEB_CONTENT", "BASE64_DATA", "LEAKSITE_CONTENT", "RAW_DNS_RECORDS", "RAW_FILE_META_DATA"])
    }

    fn produced_events(&self) -> Vec<String> {
        str_list(&["HASH"])
    }

    fn setup(&mut self, ctx: PluginContext, user_opts: &OptMap) -> Result<(), PluginError> {
        self.opts = merge_opts(&self.opts(), user_opts);
        self.reported.clear();
        self.ctx = Some(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &Arc<Event>) -> Result<(), PluginError> {
        let ctx = self.ctx.as_ref().ok_or_else(|| PluginError::Internal("not set up".into()))?;
        for (kind, hash) in extract_hashes(event.data()) {
            let data = format!("[{kind}] {hash}");
            if !self.reported.insert(data.clone()) {
                continue;
            }
            ctx.debug(&format!("Found hash: {hash}"));
            ctx.notify_listeners(Event::new("HASH", data, NAME, event)?);
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) {
    registry.register(SfpHashes::boxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiderfoot_core::testing::{plugin_context, seeded_event, CollectingSink, FakeServices};
    use spiderfoot_core::{Target, TargetType};

    const MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn extracts_only_exact_length_runs() {
        let text = format!("md5={MD5} sha1:{SHA1}, too long {MD5}0 and {}", "a".repeat(64));
        let found = extract_hashes(&text);
        assert_eq!(
            found,
            vec![
                (HashKind::Md5, MD5.to_string()),
                (HashKind::Sha1, SHA1.to_string()),
                (HashKind::Sha256, "a".repeat(64)),
            ]
        );
        assert!(extract_hashes("nothing here").is_empty());
    }

    #[test]
    fn emits_each_hash_once() {
        let sink = Arc::new(CollectingSink::default());
        let target = Target::new("example.net", TargetType::InternetName).unwrap();
        let mut p = SfpHashes::default();
        p.setup(plugin_context(NAME, target, Arc::new(FakeServices::new()), sink.clone()), &OptMap::new()).unwrap();
        let body = format!("<p>{MD5}</p><p>{MD5}</p>");
        p.handle_event(&seeded_event("example.net", "TARGET_WEB_CONTENT", &body)).unwrap();
        p.handle_event(&seeded_event("example.net", "LEAKSITE_CONTENT", MD5)).unwrap();
        assert_eq!(sink.of_type("HASH"), vec![format!("[MD5] {MD5}")]);
    }

    #[test]
    fn describes_itself() {
        let p = SfpHashes::default();
        assert_eq!(p.opts().len(), p.optdescs().len());
        assert!(p.produced_events().iter().all(|t| spiderfoot_core::event_types::is_known(t)));
    }
}

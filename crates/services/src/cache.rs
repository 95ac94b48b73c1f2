use sha2::{Digest, Sha224};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Flat directory of cached downloads keyed by SHA-224 of the cache key.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DiskCache { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(hex::encode(Sha224::digest(key.as_bytes())))
    }

    /// Last writer wins. Content goes to a temporary file in the cache dir
    /// and is renamed over the entry, so readers never see a partial write.
    pub fn put(&self, key: &str, content: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), "cannot create cache dir: {e}");
            return;
        }
        if let Err(e) = self.write_entry(key, content) {
            tracing::warn!(key, "cache write failed: {e}");
        }
    }

    fn write_entry(&self, key: &str, content: &str) -> std::io::Result<()> {
        let mut tmp = tempfile::Builder::new().prefix(".tmp").tempfile_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Empty or stale entries are misses. `max_age_hours == 0` never expires.
    pub fn get(&self, key: &str, max_age_hours: u64) -> Option<String> {
        let path = self.path_for(key);
        let meta = std::fs::metadata(&path).ok()?;
        if max_age_hours > 0 {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or_default();
            if age > Duration::from_secs(max_age_hours * 3600) {
                return None;
            }
        }
        let content = std::fs::read_to_string(path).ok()?;
        (!content.is_empty()).then_some(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().join("cache"));
        assert_eq!(cache.get("k", 0), None);
        cache.put("k", "value");
        assert_eq!(cache.get("k", 0).as_deref(), Some("value"));
        assert_eq!(cache.get("k", 1).as_deref(), Some("value"));
        cache.put("k", "newer");
        assert_eq!(cache.get("k", 0).as_deref(), Some("newer"));
    }

    #[test]
    fn empty_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        cache.put("empty", "");
        assert_eq!(cache.get("empty", 0), None);
    }

    #[test]
    fn file_names_are_sha224_hex() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        cache.put("internet_tlds", "com");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].len(), 56);
    }

    #[test]
    fn readers_never_see_a_partial_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(DiskCache::new(dir.path()));
        let writers: Vec<_> = ['a', 'b', 'c']
            .into_iter()
            .map(|ch| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let body = ch.to_string().repeat(256 * 1024);
                    for _ in 0..20 {
                        cache.put("big", &body);
                    }
                })
            })
            .collect();
        while writers.iter().any(|w| !w.is_finished()) {
            if let Some(got) = cache.get("big", 0) {
                assert_eq!(got.len(), 256 * 1024);
                let first = got.as_bytes()[0];
                assert!(got.bytes().all(|b| b == first));
            }
        }
        for w in writers {
            w.join().unwrap();
        }
        // Temporary files were all renamed into place.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

//! Content-addressed audio cache.
//!
//! Every synthesized utterance is stored once, keyed by the SHA-256 digest of
//! its exact `text|voice|speed` triple.  Entries are 1-D float32 `.npy` files
//! under `<cache-root>/mcp_kokoro/`, so a cache hit replays without touching
//! the engine at all.
//!
//! The cache is best-effort by contract: lookup failures degrade to a miss,
//! store failures leave the request successful but uncached.  Neither ever
//! fails a speak request.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::engine::Utterance;
use crate::error::Result;
use crate::npy;

/// Subdirectory under the cache root that namespaces this tool's entries.
const CACHE_SUBDIR: &str = "mcp_kokoro";

/// Hex SHA-256 of the utterance identity string `{text}|{voice}|{speed}`.
///
/// Identity is exact: any difference in text, voice, or speed (including
/// `1` vs `1.0` formatting of the same value never arising here, since speed
/// is formatted from the same `f32` each time) yields a distinct key.
pub fn cache_key(request: &Utterance) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.text.as_bytes());
    hasher.update(b"|");
    hasher.update(request.voice.as_bytes());
    hasher.update(b"|");
    hasher.update(request.speed.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// On-disk audio store addressed by [`cache_key`].
#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: PathBuf,
    /// Soft size limit.  When the store grows past it, the whole directory is
    /// cleared on the next insert — entries are cheap to regenerate and a
    /// full clear keeps the bookkeeping trivial.
    max_bytes: Option<u64>,
}

impl AudioCache {
    /// Cache rooted at `<root>/mcp_kokoro/`.  The directory is created lazily
    /// on the first store.
    pub fn new(root: impl AsRef<Path>, max_bytes: Option<u64>) -> Self {
        Self { dir: root.as_ref().join(CACHE_SUBDIR), max_bytes }
    }

    /// Cache under the platform per-user cache directory, falling back to the
    /// system temp directory when none is defined.
    pub fn in_user_cache(max_bytes: Option<u64>) -> Self {
        let root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(root, max_bytes)
    }

    /// Directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.npy", key))
    }

    /// Look up previously synthesized audio.
    ///
    /// Any failure (missing file, unreadable file, corrupt entry) is logged
    /// and reported as a miss; the caller falls through to synthesis.
    pub fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        let path = self.entry_path(key);
        if !path.is_file() {
            return None;
        }
        match npy::read_npy_1d(&path) {
            Ok(samples) => {
                tracing::debug!(key, samples = samples.len(), "cache hit");
                Some(samples)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Store synthesized audio under `key`.
    ///
    /// The entry is written to a temp file in the same directory and renamed
    /// into place, so a concurrent reader never observes a partial file.
    pub fn store(&self, key: &str, samples: &[f32]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        self.enforce_limit();

        let tmp = self.dir.join(format!(".{}.tmp", key));
        npy::write_npy_1d(&tmp, samples)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        std::fs::rename(&tmp, self.entry_path(key))?;
        tracing::debug!(key, samples = samples.len(), "cache store");
        Ok(())
    }

    /// Clear the whole store when it has grown past the soft limit.
    fn enforce_limit(&self) {
        let Some(limit) = self.max_bytes else { return };
        let total = self.total_bytes();
        if total <= limit {
            return;
        }
        tracing::info!(total, limit, "cache over soft limit, clearing");
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Err(e) = std::fs::remove_file(entry.path()) {
                        tracing::warn!(path = %entry.path().display(), error = %e,
                            "failed to remove cache entry");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list cache directory"),
        }
    }

    fn total_bytes(&self) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.dir) else { return 0 };
        entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> Utterance {
        Utterance::new(text, "af_heart", 1.0)
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(cache_key(&request("hello")), cache_key(&request("hello")));
    }

    #[test]
    fn test_key_distinguishes_every_field() {
        let base = cache_key(&request("hello"));
        assert_ne!(base, cache_key(&request("hello!")));
        assert_ne!(base, cache_key(&Utterance::new("hello", "af_bella", 1.0)));
        assert_ne!(base, cache_key(&Utterance::new("hello", "af_heart", 1.1)));
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = cache_key(&request("hello"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_store_then_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(tmp.path(), None);
        let key = cache_key(&request("hi"));

        assert!(cache.lookup(&key).is_none());
        cache.store(&key, &[0.1, -0.2, 0.3]).unwrap();
        assert_eq!(cache.lookup(&key), Some(vec![0.1, -0.2, 0.3]));
    }

    #[test]
    fn test_entries_live_under_namespace_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(tmp.path(), None);
        let key = cache_key(&request("hi"));
        cache.store(&key, &[0.5]).unwrap();

        let expected = tmp.path().join(CACHE_SUBDIR).join(format!("{}.npy", key));
        assert!(expected.is_file());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(tmp.path(), None);
        let key = cache_key(&request("hi"));
        cache.store(&key, &[0.5]).unwrap();

        std::fs::write(cache.dir().join(format!("{}.npy", key)), b"garbage").unwrap();
        assert!(cache.lookup(&key).is_none());
    }

    #[test]
    fn test_store_clears_when_over_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(tmp.path(), Some(256));

        let old_key = cache_key(&request("old"));
        cache.store(&old_key, &[0.0f32; 1024]).unwrap(); // well over 256 bytes

        let new_key = cache_key(&request("new"));
        cache.store(&new_key, &[0.1]).unwrap();

        assert!(cache.lookup(&old_key).is_none());
        assert_eq!(cache.lookup(&new_key), Some(vec![0.1]));
    }
}

//! Fingerprint-keyed local fallback cache (spec §4.10, §8 invariant 5).
//!
//! Grounded on `original_source/rayvault/agent/controller.py::_local_cache_path`
//! and `_run_local`: keyed by `(step_name, inputs_hash)`, stores only the
//! success flag, status, exit code, and receipt path — never the full
//! metrics or artifact list, which live in the receipt itself.

use crate::atomic::atomic_write_json;
use dispatch_core::{DispatchError, ErrorCode, LocalCacheEntry};
use std::path::PathBuf;

/// Owns the `<state_dir>/local_cache/` tree.
pub struct LocalCache {
    state_dir: PathBuf,
}

impl LocalCache {
    /// Open a local cache rooted at `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// `<state_dir>/local_cache/<step_name.lower()>_<inputs_hash>.json`.
    #[must_use]
    pub fn entry_path(&self, step_name: &str, inputs_hash: &str) -> PathBuf {
        let safe = format!("{}_{}.json", step_name.to_ascii_lowercase(), inputs_hash);
        self.state_dir.join("local_cache").join(safe)
    }

    /// Look up a cached entry for `(step_name, inputs_hash)`.
    ///
    /// The spec's `force` flag affects only the *caller's* decision to
    /// consult this cache, never the cache's own lookup semantics (spec §9
    /// Open Question 1) — callers that want to bypass the cache should skip
    /// calling `get` entirely rather than this method special-casing force.
    pub fn get(&self, step_name: &str, inputs_hash: &str) -> Result<Option<LocalCacheEntry>, DispatchError> {
        let path = self.entry_path(step_name, inputs_hash);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| DispatchError::new(ErrorCode::NotFound, format!("cannot read {path:?}: {e}")))?;
        let entry = serde_json::from_slice(&bytes)
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("corrupt cache entry {path:?}: {e}")))?;
        Ok(Some(entry))
    }

    /// Atomically write a cache entry for `(step_name, inputs_hash)`.
    pub fn put(&self, step_name: &str, inputs_hash: &str, entry: &LocalCacheEntry) -> Result<(), DispatchError> {
        let path = self.entry_path(step_name, inputs_hash);
        atomic_write_json(&path, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_after_put() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(tmp.path());
        assert!(cache.get("FFMPEG_PROBE", "abc").unwrap().is_none());

        let entry = LocalCacheEntry {
            ok: true,
            status: "succeeded".into(),
            exit_code: 0,
            receipt_path: "/tmp/receipts/run1/job1/job_receipt.json".into(),
        };
        cache.put("FFMPEG_PROBE", "abc", &entry).unwrap();

        let back = cache.get("FFMPEG_PROBE", "abc").unwrap().unwrap();
        assert!(back.ok);
        assert_eq!(back.receipt_path, entry.receipt_path);
    }

    #[test]
    fn entry_path_lowercases_step_name() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(tmp.path());
        let path = cache.entry_path("FFMPEG_PROBE", "abc123");
        assert_eq!(path.file_name().unwrap(), "ffmpeg_probe_abc123.json");
    }

    #[test]
    fn identical_fingerprints_share_one_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(tmp.path());
        let entry = LocalCacheEntry {
            ok: true,
            status: "succeeded".into(),
            exit_code: 0,
            receipt_path: "r1".into(),
        };
        cache.put("FFMPEG_PROBE", "dupe", &entry).unwrap();
        cache
            .put(
                "FFMPEG_PROBE",
                "dupe",
                &LocalCacheEntry {
                    receipt_path: "r2".into(),
                    ..entry
                },
            )
            .unwrap();
        let back = cache.get("FFMPEG_PROBE", "dupe").unwrap().unwrap();
        assert_eq!(back.receipt_path, "r2");
    }
}

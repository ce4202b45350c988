//! Local fallback executor (spec §4.10).
//!
//! Uses the same dispatch table the worker uses
//! (`dispatch_executor::Registry`) and writes into the same receipt layout
//! (`dispatch_receipt::ReceiptStore`), so a receipt produced locally is
//! indistinguishable in shape from one a remote worker would have written.
//! Grounded on
//! `original_source/rayvault/agent/controller.py::_run_local`/`_local_cache_path`.

use crate::types::SubmitResult;
use dispatch_core::{utc_now_iso, JobArtifact, LocalCacheEntry, Receipt, ReceiptMode};
use dispatch_executor::{ExecutionContext, Registry};
use dispatch_receipt::{LocalCache, ReceiptStore};
use std::sync::Arc;
use std::time::Instant;

/// Executes job steps synchronously on the controller host when no worker
/// can take them, sharing the dispatch table and receipt layout a worker
/// would use.
pub struct LocalExecutor {
    registry: Arc<Registry>,
    receipts: Arc<ReceiptStore>,
    cache: LocalCache,
}

impl LocalExecutor {
    /// Build a local executor over `registry`, persisting receipts and its
    /// fingerprint cache under `receipts`' state directory.
    #[must_use]
    pub fn new(registry: Arc<Registry>, receipts: Arc<ReceiptStore>) -> Self {
        let cache = LocalCache::new(receipts.state_dir());
        Self { registry, receipts, cache }
    }

    /// Run `step_name` against `payload` locally, consulting the fingerprint
    /// cache first unless `force` is set (spec §9 Open Question 1: `force`
    /// affects only this lookup, never worker-side dedup).
    pub fn run(
        &self,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        inputs_hash: &str,
        payload: &serde_json::Value,
        force: bool,
    ) -> SubmitResult {
        if !force {
            match self.cache.get(step_name, inputs_hash) {
                Ok(Some(entry)) => {
                    return SubmitResult {
                        ok: entry.ok,
                        mode: ReceiptMode::LocalCached.to_string(),
                        run_id: run_id.to_string(),
                        job_id: job_id.to_string(),
                        step_name: step_name.to_string(),
                        status: entry.status,
                        node_id: "local".to_string(),
                        idempotent: true,
                        exit_code: entry.exit_code,
                        message: "cached local receipt".to_string(),
                        receipt_path: entry.receipt_path,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    return self.record_failure(run_id, job_id, step_name, inputs_hash, &e.code().to_string(), e.message());
                }
            }
        }

        let started = Instant::now();
        let started_at = utc_now_iso();
        let ctx = ExecutionContext {
            workspace_root: self.receipts.state_dir().join("local_workspace"),
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
        };

        match self.registry.dispatch(step_name, payload, &ctx) {
            Ok(outcome) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let log_path = self.receipts.log_path(run_id, job_id);
                let _ = self.receipts.append_log(
                    run_id,
                    job_id,
                    &format!(
                        "{{\"ts\":\"{}\",\"event\":\"local_fallback\",\"status\":\"succeeded\"}}",
                        utc_now_iso()
                    ),
                );

                let receipt = Receipt {
                    mode: ReceiptMode::Local,
                    run_id: run_id.to_string(),
                    job_id: job_id.to_string(),
                    step_name: step_name.to_string(),
                    inputs_hash: inputs_hash.to_string(),
                    node_id: "local".to_string(),
                    status: "succeeded".to_string(),
                    exit_code: 0,
                    started_at,
                    finished_at: utc_now_iso(),
                    duration_ms: Some(duration_ms),
                    metrics: outcome.metrics,
                    artifacts: outcome.artifacts,
                    log_path: log_path.display().to_string(),
                    error_code: String::new(),
                    error_message: String::new(),
                    artifact_mismatches: Vec::new(),
                };

                let receipt_path = match self.receipts.write_receipt(run_id, job_id, &receipt) {
                    Ok(p) => p,
                    Err(e) => return self.record_failure(run_id, job_id, step_name, inputs_hash, &e.code().to_string(), e.message()),
                };

                let _ = self.cache.put(
                    step_name,
                    inputs_hash,
                    &LocalCacheEntry {
                        ok: true,
                        status: "succeeded".to_string(),
                        exit_code: 0,
                        receipt_path: receipt_path.display().to_string(),
                    },
                );

                SubmitResult {
                    ok: true,
                    mode: ReceiptMode::Local.to_string(),
                    run_id: run_id.to_string(),
                    job_id: job_id.to_string(),
                    step_name: step_name.to_string(),
                    status: "succeeded".to_string(),
                    node_id: "local".to_string(),
                    idempotent: false,
                    exit_code: 0,
                    message: String::new(),
                    receipt_path: receipt_path.display().to_string(),
                }
            }
            Err(err) => self.record_failure(run_id, job_id, step_name, inputs_hash, &err.code().to_string(), err.message()),
        }
    }

    fn record_failure(
        &self,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        inputs_hash: &str,
        error_code: &str,
        error_message: &str,
    ) -> SubmitResult {
        let log_path = self.receipts.log_path(run_id, job_id);
        let _ = self.receipts.append_log(
            run_id,
            job_id,
            &format!(
                "{{\"ts\":\"{}\",\"event\":\"local_fallback\",\"status\":\"failed\",\"error_code\":\"{error_code}\"}}",
                utc_now_iso()
            ),
        );

        let receipt = Receipt {
            mode: ReceiptMode::Local,
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            step_name: step_name.to_string(),
            inputs_hash: inputs_hash.to_string(),
            node_id: "local".to_string(),
            status: "failed".to_string(),
            exit_code: 2,
            started_at: String::new(),
            finished_at: utc_now_iso(),
            duration_ms: None,
            metrics: serde_json::Map::new(),
            artifacts: Vec::<JobArtifact>::new(),
            log_path: log_path.display().to_string(),
            error_code: error_code.to_string(),
            error_message: error_message.to_string(),
            artifact_mismatches: Vec::new(),
        };

        let receipt_path = self
            .receipts
            .write_receipt(run_id, job_id, &receipt)
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let _ = self.cache.put(
            step_name,
            inputs_hash,
            &LocalCacheEntry {
                ok: false,
                status: "failed".to_string(),
                exit_code: 2,
                receipt_path: receipt_path.clone(),
            },
        );

        SubmitResult {
            ok: false,
            mode: ReceiptMode::Local.to_string(),
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            step_name: step_name.to_string(),
            status: "failed".to_string(),
            node_id: "local".to_string(),
            idempotent: false,
            exit_code: 2,
            message: format!("{error_code}: {error_message}"),
            receipt_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_executor::EchoHandler;

    fn executor() -> (LocalExecutor, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = Registry::new();
        registry.register("FFMPEG_PROBE", Box::new(EchoHandler));
        let receipts = Arc::new(ReceiptStore::new(tmp.path()));
        (LocalExecutor::new(Arc::new(registry), receipts), tmp)
    }

    #[test]
    fn miss_then_run_then_cache_hit() {
        let (exec, _tmp) = executor();
        let first = exec.run("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), &serde_json::json!({}), false);
        assert!(first.ok);
        assert_eq!(first.mode, "local");
        assert!(!first.idempotent);

        let second = exec.run("run1", "job2", "FFMPEG_PROBE", &"a".repeat(16), &serde_json::json!({}), false);
        assert!(second.ok);
        assert_eq!(second.mode, "local_cached");
        assert!(second.idempotent);
    }

    #[test]
    fn force_bypasses_cache() {
        let (exec, _tmp) = executor();
        exec.run("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), &serde_json::json!({}), false);
        let forced = exec.run("run1", "job2", "FFMPEG_PROBE", &"a".repeat(16), &serde_json::json!({}), true);
        assert_eq!(forced.mode, "local");
    }

    #[test]
    fn unsupported_step_is_recorded_as_failure() {
        let (exec, _tmp) = executor();
        let result = exec.run("run1", "job1", "NOT_REGISTERED", &"a".repeat(16), &serde_json::json!({}), false);
        assert!(!result.ok);
        assert_eq!(result.status, "failed");
    }
}

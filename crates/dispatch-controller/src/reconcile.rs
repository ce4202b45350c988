//! Reconciler: polls a submitted remote job to completion and downloads its
//! artifacts (spec §4.9).
//!
//! Grounded on
//! `original_source/rayvault/agent/controller.py::_poll_remote_status`/
//! `_job_is_success`, adapted to `tokio::time::sleep` for the poll loop and
//! `reqwest` for the outbound calls (the teacher's stack, `abp-daemon`'s
//! HTTP client choice).

use dispatch_capability::ClusterNode;
use dispatch_core::{DispatchError, ErrorCode, JobArtifact, Receipt, ReceiptMode};
use dispatch_protocol::build_envelope;
use dispatch_receipt::{verify_artifact_sha256, ReceiptStore};
use std::time::Duration;

/// Default interval between `/job/{job_id}` polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;

/// Default poll deadline, in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: f64 = 900.0;

/// Central success-classification rule, applied identically by the worker's
/// own runner and by this reconciler (spec §4.9).
///
/// Operates on the raw JSON job/status payload so it can classify records
/// from workers that use the broader status vocabulary
/// (`completed`/`error`/`cancelled`) the spec names, not just the closed
/// `{queued,running,succeeded,failed}` set this workspace's own worker
/// produces.
#[must_use]
pub fn classify_success(status_payload: &serde_json::Value) -> bool {
    let status = status_payload
        .get("status")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match status.as_str() {
        "succeeded" => true,
        "failed" | "error" | "cancelled" => false,
        "completed" => {
            let error_populated = match status_payload.get("error") {
                None => false,
                Some(serde_json::Value::Null) => false,
                Some(serde_json::Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            };
            let result_status = status_payload
                .get("result")
                .and_then(|r| r.get("status"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            let result_failed = matches!(result_status.as_str(), "error" | "failed" | "failure");
            !error_populated && !result_failed
        }
        _ => false,
    }
}

/// Derive a process-style exit code for a terminal status when the payload
/// doesn't already carry one (spec §4.9 "Exit code normalization").
#[must_use]
pub fn normalize_exit_code(status_payload: &serde_json::Value, ok: bool) -> i32 {
    if let Some(code) = status_payload.get("exit_code").and_then(serde_json::Value::as_i64) {
        return code as i32;
    }
    if ok {
        0
    } else {
        1
    }
}

/// `true` if `status` (already lower-cased) is terminal under the central
/// classification rule's vocabulary.
fn is_terminal_status(status: &str) -> bool {
    matches!(status, "succeeded" | "failed" | "error" | "cancelled" | "completed")
}

/// Poll a submitted job to completion, download its logs and artifacts, and
/// write a local receipt; returns the written receipt and its path.
#[derive(Clone)]
pub struct Reconciler {
    client: reqwest::Client,
    receipts: std::sync::Arc<ReceiptStore>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl Reconciler {
    /// Build a reconciler writing into `receipts`, polling every
    /// `poll_interval_secs` up to `poll_timeout_secs`.
    #[must_use]
    pub fn new(receipts: std::sync::Arc<ReceiptStore>, poll_interval_secs: f64, poll_timeout_secs: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            receipts,
            poll_interval: Duration::from_secs_f64(poll_interval_secs.max(0.1)),
            poll_timeout: Duration::from_secs_f64(poll_timeout_secs.max(1.0)),
        }
    }

    /// Poll `node` for `job_id`'s status until terminal or the deadline
    /// passes, then fetch logs and artifacts and write a receipt.
    pub async fn reconcile(
        &self,
        node: &ClusterNode,
        secret: &str,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        inputs_hash: &str,
    ) -> Result<(std::path::PathBuf, Receipt), DispatchError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        let job = loop {
            let status_payload = self.fetch_status(node, secret, run_id, job_id, inputs_hash).await?;
            let job = status_payload.get("job").cloned().unwrap_or(status_payload.clone());
            let status = job.get("status").and_then(serde_json::Value::as_str).unwrap_or("").trim().to_ascii_lowercase();
            if is_terminal_status(&status) {
                break job;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DispatchError::new(
                    ErrorCode::Timeout,
                    format!("remote job polling timed out: node={} job_id={job_id}", node.node_id),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        self.snapshot(node, secret, run_id, job_id, step_name, inputs_hash, job).await
    }

    /// Re-fetch an already-submitted remote job's current status, logs, and
    /// artifacts without polling for a terminal state first, and write a
    /// receipt reflecting whatever the worker reports right now.
    ///
    /// Backs the `sync-artifacts` CLI subcommand (SPEC_FULL.md §F.1):
    /// re-poll `/job/{job_id}` once, then run the same artifact-snapshot
    /// path `reconcile` uses once a job goes terminal.
    pub async fn sync_artifacts(
        &self,
        node: &ClusterNode,
        secret: &str,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        inputs_hash: &str,
    ) -> Result<(std::path::PathBuf, Receipt), DispatchError> {
        let status_payload = self.fetch_status(node, secret, run_id, job_id, inputs_hash).await?;
        let job = status_payload.get("job").cloned().unwrap_or(status_payload);
        self.snapshot(node, secret, run_id, job_id, step_name, inputs_hash, job).await
    }

    async fn snapshot(
        &self,
        node: &ClusterNode,
        secret: &str,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        inputs_hash: &str,
        job: serde_json::Value,
    ) -> Result<(std::path::PathBuf, Receipt), DispatchError> {
        let ok = classify_success(&job);
        let exit_code = normalize_exit_code(&job, ok);
        let status = job.get("status").and_then(serde_json::Value::as_str).unwrap_or("unknown").to_string();

        let logs_text = self.fetch_logs(node, secret, run_id, job_id, step_name, inputs_hash).await.unwrap_or_default();
        if !logs_text.is_empty() {
            for line in logs_text.lines() {
                let _ = self.receipts.append_log(run_id, job_id, line);
            }
        }

        let (artifacts, mismatches) = self
            .fetch_and_verify_artifacts(node, secret, run_id, job_id, step_name, inputs_hash)
            .await
            .unwrap_or_default();

        let final_ok = ok && mismatches.is_empty();
        let final_status = if final_ok { status.clone() } else { "failed".to_string() };
        let error_code = if mismatches.is_empty() {
            if ok { String::new() } else { "REMOTE_JOB_FAILED".to_string() }
        } else {
            ErrorCode::ArtifactHashMismatch.to_string()
        };

        let receipt = Receipt {
            mode: ReceiptMode::Remote,
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            step_name: step_name.to_string(),
            inputs_hash: inputs_hash.to_string(),
            node_id: node.node_id.clone(),
            status: final_status,
            exit_code: if final_ok { exit_code } else { exit_code.max(1) },
            started_at: job.get("started_at").and_then(serde_json::Value::as_str).unwrap_or_default().to_string(),
            finished_at: job.get("finished_at").and_then(serde_json::Value::as_str).unwrap_or_default().to_string(),
            duration_ms: None,
            metrics: job.get("metrics").and_then(|v| v.as_object()).cloned().unwrap_or_default(),
            artifacts,
            log_path: self.receipts.log_path(run_id, job_id).display().to_string(),
            error_code,
            error_message: job.get("message").and_then(serde_json::Value::as_str).unwrap_or_default().to_string(),
            artifact_mismatches: mismatches,
        };

        let receipt_path = self.receipts.write_receipt(run_id, job_id, &receipt)?;
        Ok((receipt_path, receipt))
    }

    async fn fetch_status(
        &self,
        node: &ClusterNode,
        secret: &str,
        run_id: &str,
        job_id: &str,
        inputs_hash: &str,
    ) -> Result<serde_json::Value, DispatchError> {
        let env = build_envelope(run_id, job_id, "JOB_STATUS", inputs_hash, secret, None)?;
        let url = format!("{}/job/{job_id}", node.base_url);
        self.get_json(&url, &env, node.timeout).await
    }

    async fn fetch_logs(
        &self,
        node: &ClusterNode,
        secret: &str,
        run_id: &str,
        job_id: &str,
        _step_name: &str,
        inputs_hash: &str,
    ) -> Result<String, DispatchError> {
        let env = build_envelope(run_id, job_id, "JOB_LOGS", inputs_hash, secret, None)?;
        let url = format!("{}/job/{job_id}/logs", node.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(node.timeout)
            .query(&[
                ("run_id", env.run_id.as_str()),
                ("step_name", env.step_name.as_str()),
                ("inputs_hash", env.inputs_hash.as_str()),
                ("timestamp", env.timestamp.as_str()),
                ("auth_token", env.auth_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DispatchError::new(ErrorCode::Timeout, format!("fetching logs from {}: {e}", node.node_id)))?;
        resp.text()
            .await
            .map_err(|e| DispatchError::new(ErrorCode::Timeout, format!("reading logs body from {}: {e}", node.node_id)))
    }

    async fn fetch_and_verify_artifacts(
        &self,
        node: &ClusterNode,
        secret: &str,
        run_id: &str,
        job_id: &str,
        _step_name: &str,
        inputs_hash: &str,
    ) -> Result<(Vec<JobArtifact>, Vec<String>), DispatchError> {
        let env = build_envelope(run_id, job_id, "JOB_ARTIFACTS", inputs_hash, secret, None)?;
        let url = format!("{}/job/{job_id}/artifacts", node.base_url);
        let list_payload = self.get_json(&url, &env, node.timeout).await?;

        let remote_artifacts: Vec<JobArtifact> = list_payload
            .get("artifacts")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let mut stored = Vec::with_capacity(remote_artifacts.len());
        let mut mismatches = Vec::new();

        for artifact in &remote_artifacts {
            let name = std::path::Path::new(&artifact.path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| artifact.path.clone());
            let file_url = format!("{}/job/{job_id}/artifacts/{name}", node.base_url);
            let bytes = match self
                .client
                .get(&file_url)
                .timeout(node.timeout)
                .query(&[
                    ("run_id", env.run_id.as_str()),
                    ("step_name", env.step_name.as_str()),
                    ("inputs_hash", env.inputs_hash.as_str()),
                    ("timestamp", env.timestamp.as_str()),
                    ("auth_token", env.auth_token.as_str()),
                ])
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(resp) => resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default(),
                Err(_) => continue,
            };

            if !verify_artifact_sha256(&bytes, &artifact.sha256) {
                mismatches.push(name.clone());
                continue;
            }

            if let Ok(path) = self.receipts.write_artifact(run_id, job_id, &name, &bytes) {
                stored.push(JobArtifact {
                    path: path.display().to_string(),
                    sha256: artifact.sha256.clone(),
                    size_bytes: bytes.len() as u64,
                });
            }
        }

        // Bulk archive is an optional enhancement; not every worker serves it.
        let zip_url = format!("{}/job/{job_id}/artifacts.zip", node.base_url);
        if let Ok(resp) = self.client.get(&zip_url).timeout(node.timeout).send().await {
            if resp.status().is_success() {
                if let Ok(bytes) = resp.bytes().await {
                    let _ = self.receipts.write_artifact(run_id, job_id, "artifacts.zip", &bytes);
                }
            }
        }

        Ok((stored, mismatches))
    }

    async fn get_json(&self, url: &str, env: &dispatch_protocol::Envelope, timeout: Duration) -> Result<serde_json::Value, DispatchError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .query(&[
                ("run_id", env.run_id.as_str()),
                ("step_name", env.step_name.as_str()),
                ("inputs_hash", env.inputs_hash.as_str()),
                ("timestamp", env.timestamp.as_str()),
                ("auth_token", env.auth_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DispatchError::new(ErrorCode::Timeout, format!("GET {url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(DispatchError::new(ErrorCode::RemoteSubmitFailed, format!("GET {url}: HTTP {}", resp.status())));
        }
        resp.json().await.map_err(|e| DispatchError::new(ErrorCode::RemoteSubmitFailed, format!("parsing {url}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_status_is_success() {
        assert!(classify_success(&serde_json::json!({"status": "succeeded"})));
    }

    #[test]
    fn failed_error_cancelled_are_failure() {
        assert!(!classify_success(&serde_json::json!({"status": "failed"})));
        assert!(!classify_success(&serde_json::json!({"status": "error"})));
        assert!(!classify_success(&serde_json::json!({"status": "cancelled"})));
    }

    #[test]
    fn completed_without_error_is_success() {
        assert!(classify_success(&serde_json::json!({"status": "completed"})));
    }

    #[test]
    fn completed_with_populated_error_is_failure() {
        assert!(!classify_success(&serde_json::json!({"status": "completed", "error": "boom"})));
    }

    #[test]
    fn completed_with_failed_result_status_is_failure() {
        assert!(!classify_success(&serde_json::json!({
            "status": "completed",
            "result": {"status": "failed"},
        })));
    }

    #[test]
    fn unknown_status_is_failure() {
        assert!(!classify_success(&serde_json::json!({"status": "queued"})));
    }

    #[test]
    fn exit_code_defaults_by_classification() {
        assert_eq!(normalize_exit_code(&serde_json::json!({}), true), 0);
        assert_eq!(normalize_exit_code(&serde_json::json!({}), false), 1);
        assert_eq!(normalize_exit_code(&serde_json::json!({"exit_code": 7}), false), 7);
    }
}

//! Capability-aware scheduler (spec §4.8 `submit-job`).
//!
//! Grounded on
//! `original_source/rayvault/agent/controller.py::submit_job`, with the
//! legacy HMAC-candidate submission path and `LEGACY_JOB_TYPE_MAP` step
//! aliasing deliberately left out (SPEC_FULL.md §F): every candidate speaks
//! the modern signed-envelope protocol only.

use crate::local::LocalExecutor;
use crate::reconcile::Reconciler;
use crate::types::SubmitResult;
use dispatch_capability::{meets_requirements, ClusterNode, WorkerRegistry};
use dispatch_core::{normalize_step_name, DispatchError, ErrorCode, Requirements, JOB_STEPS};
use dispatch_protocol::build_envelope;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Schedules job submissions across the cluster, retrying and falling back
/// to local execution per spec §4.8.
pub struct Scheduler {
    registry: Arc<WorkerRegistry>,
    reconciler: Reconciler,
    local: LocalExecutor,
    client: reqwest::Client,
    secret: String,
    mac_only_steps: HashSet<String>,
}

impl Scheduler {
    /// Build a scheduler over `registry`'s configured workers.
    #[must_use]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        reconciler: Reconciler,
        local: LocalExecutor,
        secret: impl Into<String>,
        mac_only_steps: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry,
            reconciler,
            local,
            client: reqwest::Client::new(),
            secret: secret.into(),
            mac_only_steps: mac_only_steps.into_iter().collect(),
        }
    }

    /// Submit a job, per spec §4.8's five numbered steps.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_job(
        &self,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        payload: &serde_json::Value,
        requirements: &Requirements,
        inputs_hash: Option<String>,
        force: bool,
        allow_local_fallback: bool,
    ) -> SubmitResult {
        let step = normalize_step_name(step_name);

        // Step 2 (computed ahead of Step 1): fingerprint the payload if the
        // caller didn't already, so the mac-only/local path below keys its
        // cache on a real fingerprint rather than an empty string.
        let hash_value = match inputs_hash {
            Some(h) if !h.is_empty() => h,
            _ => match dispatch_protocol::compute_inputs_hash(payload) {
                Ok(h) => h,
                Err(e) => return failed_result(run_id, job_id, &step, e.code(), e.message()),
            },
        };

        // Step 1: mac-only or unknown steps never leave this host.
        if self.mac_only_steps.contains(&step) || !JOB_STEPS.contains(&step.as_str()) {
            return self.local.run(run_id, job_id, &step, &hash_value, payload, force);
        }

        // Step 3: candidate list.
        let candidates: Vec<&ClusterNode> = self
            .registry
            .nodes()
            .iter()
            .filter(|node| {
                let caps = self.registry.cached_caps(&node.node_id).unwrap_or_default();
                meets_requirements(&caps, requirements).0
            })
            .collect();

        if candidates.is_empty() {
            let rejections: Vec<String> = self
                .registry
                .nodes()
                .iter()
                .map(|node| {
                    let caps = self.registry.cached_caps(&node.node_id).unwrap_or_default();
                    let (_, reason) = meets_requirements(&caps, requirements);
                    format!("{}: {reason}", node.node_id)
                })
                .collect();
            let msg = if rejections.is_empty() {
                "no enabled worker nodes".to_string()
            } else {
                format!("no worker satisfies requirements ({})", rejections.join("; "))
            };

            if allow_local_fallback {
                let mut fallback = self.local.run(run_id, job_id, &step, &hash_value, payload, force);
                fallback.annotate(&msg);
                return fallback;
            }
            return failed_result(run_id, job_id, &step, ErrorCode::NoEligibleWorker, &msg);
        }

        // Step 4: attempt loop.
        let mut last_error = String::new();
        let mut fatal = false;
        for attempt in 1..=MAX_ATTEMPTS {
            let mut unsupported_count = 0usize;
            for node in candidates.iter().copied() {
                let caps = self.registry.cached_caps(&node.node_id).unwrap_or_default();
                if !step_supported(&caps, &step) {
                    last_error = format!("{}: STEP_UNSUPPORTED", node.node_id);
                    unsupported_count += 1;
                    continue;
                }

                match self.submit_to_node(node, run_id, job_id, &step, &hash_value, payload).await {
                    Ok((submitted_job_id, idempotent)) => {
                        match self.reconciler.reconcile(node, &self.secret, run_id, &submitted_job_id, &step, &hash_value).await {
                            Ok((receipt_path, receipt)) if receipt.is_success() => {
                                return SubmitResult {
                                    ok: true,
                                    mode: "remote".to_string(),
                                    run_id: run_id.to_string(),
                                    job_id: submitted_job_id,
                                    step_name: step,
                                    status: receipt.status,
                                    node_id: node.node_id.clone(),
                                    idempotent,
                                    exit_code: receipt.exit_code,
                                    message: String::new(),
                                    receipt_path: receipt_path.display().to_string(),
                                };
                            }
                            Ok((receipt_path, receipt)) => {
                                last_error = format!(
                                    "{}: remote job failed status={} receipt={}",
                                    node.node_id,
                                    receipt.status,
                                    receipt_path.display()
                                );
                            }
                            Err(e) => {
                                last_error = format!("{}: {e}", node.node_id);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(node_id = %node.node_id, error = %e, "remote submit failed");
                        last_error = format!("{}: {e}", node.node_id);
                    }
                }
            }
            if unsupported_count == candidates.len() {
                fatal = true;
            }
            if fatal {
                break;
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        // Step 5: exhausted every candidate.
        if allow_local_fallback {
            let mut fallback = self.local.run(run_id, job_id, &step, &hash_value, payload, force);
            fallback.annotate(&last_error);
            fallback
        } else {
            failed_result(run_id, job_id, &step, ErrorCode::RemoteSubmitFailed, &last_error)
        }
    }

    async fn submit_to_node(
        &self,
        node: &ClusterNode,
        run_id: &str,
        job_id: &str,
        step: &str,
        inputs_hash: &str,
        payload: &serde_json::Value,
    ) -> Result<(String, bool), DispatchError> {
        let env = build_envelope(run_id, job_id, step, inputs_hash, &self.secret, None)?;
        let body = serde_json::json!({
            "run_id": env.run_id,
            "job_id": env.job_id,
            "step_name": env.step_name,
            "inputs_hash": env.inputs_hash,
            "timestamp": env.timestamp,
            "auth_token": env.auth_token,
            "message_type": "submit_job",
            "payload": payload,
        });

        let resp = self
            .client
            .post(format!("{}/job", node.base_url))
            .timeout(node.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::new(ErrorCode::RemoteSubmitFailed, format!("POST /job on {}: {e}", node.node_id)))?;

        if !resp.status().is_success() {
            return Err(DispatchError::new(
                ErrorCode::RemoteSubmitFailed,
                format!("POST /job on {}: HTTP {}", node.node_id, resp.status()),
            ));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DispatchError::new(ErrorCode::RemoteSubmitFailed, format!("parsing submit response: {e}")))?;

        let submitted_job_id = value
            .get("job")
            .and_then(|j| j.get("job_id"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or(job_id)
            .to_string();
        let idempotent = value.get("idempotent").and_then(serde_json::Value::as_bool).unwrap_or(false);
        Ok((submitted_job_id, idempotent))
    }
}

/// `true` if `caps` either doesn't publish a step list at all (assume
/// support) or publishes one that names `step`.
fn step_supported(caps: &dispatch_core::CapabilityReport, step: &str) -> bool {
    match caps.get("steps").and_then(serde_json::Value::as_array) {
        None => true,
        Some(steps) => steps.iter().any(|s| s.as_str() == Some(step)),
    }
}

fn failed_result(run_id: &str, job_id: &str, step: &str, code: ErrorCode, message: &str) -> SubmitResult {
    SubmitResult {
        ok: false,
        mode: "remote".to_string(),
        run_id: run_id.to_string(),
        job_id: job_id.to_string(),
        step_name: step.to_string(),
        status: "failed".to_string(),
        node_id: String::new(),
        idempotent: false,
        exit_code: 1,
        message: format!("{code}: {message}"),
        receipt_path: String::new(),
    }
}

//! Worker registry: healthcheck aggregation and capability registration
//! (spec §4.4, supplemented per SPEC_FULL.md §F.2-F.3).

use crate::config::NodeEntry;
use dispatch_core::{CapabilityReport, DispatchError, ErrorCode};
use dispatch_protocol::build_envelope;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A schedulable worker, resolved from [`NodeEntry`] into something with a
/// ready-to-call base URL.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Unique node identifier.
    pub node_id: String,
    /// `http://host:port` base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClusterNode {
    /// Build a [`ClusterNode`] from a config entry.
    #[must_use]
    pub fn from_entry(entry: &NodeEntry) -> Self {
        Self {
            node_id: entry.node_id.clone(),
            base_url: format!("http://{}:{}", entry.host, entry.port),
            timeout: Duration::from_secs(entry.timeout_sec),
        }
    }
}

/// Health of a single worker, as returned by its `/health` endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerHealth {
    /// Node this result is for.
    pub node_id: String,
    /// Whether the request succeeded and the worker reported healthy.
    pub ok: bool,
    /// Wall-clock time the request took.
    pub elapsed_ms: u64,
    /// Worker's current queue depth, if reported.
    pub queue_depth: Option<u64>,
    /// Transport or protocol error, if any.
    pub error: Option<String>,
}

/// Aggregate healthcheck result across the cluster (spec §4.4 `healthcheck()`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterHealth {
    /// `true` if at least one worker reported healthy.
    pub ok: bool,
    /// Per-worker results, in node order.
    pub workers: Vec<WorkerHealth>,
}

/// Registry over the cluster's enabled worker nodes, with a memoizing
/// capability cache.
pub struct WorkerRegistry {
    client: reqwest::Client,
    nodes: Vec<ClusterNode>,
    caps_cache: Mutex<HashMap<String, CapabilityReport>>,
}

impl WorkerRegistry {
    /// Build a registry over `nodes` using a fresh `reqwest::Client`.
    #[must_use]
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self {
            client: reqwest::Client::new(),
            nodes,
            caps_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The nodes this registry was built with.
    #[must_use]
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// `GET /health` on every node with its own timeout; per-node errors are
    /// captured rather than raised (spec §4.4).
    pub async fn healthcheck(&self) -> ClusterHealth {
        let mut workers = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let started = Instant::now();
            let url = format!("{}/health", node.base_url);
            let result = self.client.get(&url).timeout(node.timeout).send().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            workers.push(match result {
                Ok(resp) if resp.status().is_success() => {
                    let body: serde_json::Value = resp.json().await.unwrap_or_default();
                    WorkerHealth {
                        node_id: node.node_id.clone(),
                        ok: true,
                        elapsed_ms,
                        queue_depth: body.get("queue_depth").and_then(serde_json::Value::as_u64),
                        error: None,
                    }
                }
                Ok(resp) => WorkerHealth {
                    node_id: node.node_id.clone(),
                    ok: false,
                    elapsed_ms,
                    queue_depth: None,
                    error: Some(format!("HTTP {}", resp.status())),
                },
                Err(e) => WorkerHealth {
                    node_id: node.node_id.clone(),
                    ok: false,
                    elapsed_ms,
                    queue_depth: None,
                    error: Some(e.to_string()),
                },
            });
        }

        ClusterHealth {
            ok: workers.iter().any(|w| w.ok),
            workers,
        }
    }

    /// POST a signed `register_caps` message to `node`, trying each secret
    /// in `secret_candidates` in order; cache and return the first
    /// successful capability report.
    pub async fn register_caps(
        &self,
        node: &ClusterNode,
        secret_candidates: &[String],
    ) -> Result<CapabilityReport, DispatchError> {
        let run_id = "registry";
        let job_id = node.node_id.clone();
        let inputs_hash = "0".repeat(16);

        let mut last_err = None;
        for secret in secret_candidates {
            let env = build_envelope(run_id, &job_id, "REGISTER_CAPS", &inputs_hash, secret, None)?;
            let body = serde_json::json!({
                "run_id": env.run_id,
                "job_id": env.job_id,
                "step_name": env.step_name,
                "inputs_hash": env.inputs_hash,
                "timestamp": env.timestamp,
                "auth_token": env.auth_token,
                "message_type": "register_caps",
                "payload": {},
            });

            let resp = self
                .client
                .post(format!("{}/caps", node.base_url))
                .timeout(node.timeout)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let caps: CapabilityReport = r.json().await.unwrap_or_default();
                    self.caps_cache.lock().unwrap().insert(node.node_id.clone(), caps.clone());
                    return Ok(caps);
                }
                Ok(r) => last_err = Some(format!("HTTP {}", r.status())),
                Err(e) => last_err = Some(e.to_string()),
            }
        }

        Err(DispatchError::new(
            ErrorCode::CapsUnavailable,
            format!(
                "node {} rejected register_caps under all {} candidate secret(s): {}",
                node.node_id,
                secret_candidates.len(),
                last_err.unwrap_or_default()
            ),
        ))
    }

    /// Memoized accessor for a node's last-registered capability report.
    #[must_use]
    pub fn cached_caps(&self, node_id: &str) -> Option<CapabilityReport> {
        self.caps_cache.lock().unwrap().get(node_id).cloned()
    }
}

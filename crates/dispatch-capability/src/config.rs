//! Cluster node configuration (spec §4.4, §6).
//!
//! Mirrors `abp-cli::config`'s split between a `ConfigError` enum and a
//! separate `validate_config` pass: parsing failures and semantic failures
//! (duplicate node ids, missing secret source) get distinct messages.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Failure loading or validating a cluster configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid JSON.
    #[error("cannot parse config {path}: {source}")]
    Parse {
        /// Path that was attempted.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The parsed document violated a semantic rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a node resolves its shared HMAC secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the environment variable holding this node's shared secret.
    #[serde(default)]
    pub secret_env: Option<String>,
}

/// One entry in the cluster configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Unique identifier for this node.
    pub node_id: String,
    /// Hostname or IP the worker listens on.
    pub host: String,
    /// Port the worker listens on.
    pub port: u16,
    /// `"worker"` or `"controller"`; only `"worker"` nodes are schedulable.
    pub role: String,
    /// Whether this node currently participates in scheduling.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-node HTTP timeout in seconds.
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    /// Free-form tags for operator bookkeeping.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Secret resolution configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_true() -> bool {
    true
}

fn default_timeout_sec() -> u64 {
    30
}

/// Controller-side tuning knobs (spec §6 "optional `controller: {...}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Per-request HTTP timeout, in seconds, when a node entry doesn't set
    /// its own `timeout_sec`.
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
    /// Reconciler poll interval, in seconds.
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: f64,
    /// Reconciler poll deadline, in seconds.
    #[serde(default = "default_poll_timeout_sec")]
    pub poll_timeout_sec: f64,
    /// Root directory the local fallback executor stages job workspaces under.
    #[serde(default)]
    pub local_workspace_root: Option<String>,
    /// Steps that always run on the controller host and never leave it
    /// (spec §4.8 step 1's "configured mac-only set").
    #[serde(default)]
    pub mac_only_steps: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            request_timeout_sec: default_request_timeout_sec(),
            poll_interval_sec: default_poll_interval_sec(),
            poll_timeout_sec: default_poll_timeout_sec(),
            local_workspace_root: None,
            mac_only_steps: Vec::new(),
        }
    }
}

fn default_request_timeout_sec() -> u64 {
    30
}

fn default_poll_interval_sec() -> f64 {
    2.0
}

fn default_poll_timeout_sec() -> f64 {
    900.0
}

/// Top-level cluster configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// All configured nodes, workers and controllers alike.
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    /// Directory receipts, logs, and the local cache are rooted under.
    #[serde(default)]
    pub state_dir: Option<String>,
    /// Controller tuning knobs.
    #[serde(default)]
    pub controller: ControllerSettings,
    /// Fallback secret resolution, used when a node doesn't set its own
    /// `auth.secret_env`.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Load and validate a [`ClusterConfig`] from `path`.
pub fn load_config(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let config: ClusterConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Semantic checks that parsing alone can't catch.
pub fn validate_config(config: &ClusterConfig) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for node in &config.nodes {
        if node.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if !seen.insert(node.node_id.clone()) {
            return Err(ConfigError::Invalid(format!("duplicate node_id: {}", node.node_id)));
        }
        if !["worker", "controller"].contains(&node.role.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "node {} has unrecognized role {:?}",
                node.node_id, node.role
            )));
        }
    }
    Ok(())
}

/// Workers that should currently be considered for scheduling: `enabled`
/// and `role == "worker"` (spec §4.4).
#[must_use]
pub fn schedulable_workers(config: &ClusterConfig) -> Vec<&NodeEntry> {
    config.nodes.iter().filter(|n| n.enabled && n.role == "worker").collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_rejects_duplicate_node_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cluster.json");
        std::fs::write(
            &path,
            r#"{"nodes":[{"node_id":"w1","host":"a","port":1,"role":"worker"},{"node_id":"w1","host":"b","port":2,"role":"worker"}]}"#,
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn schedulable_workers_filters_disabled_and_controllers() {
        let config = ClusterConfig {
            nodes: vec![
                NodeEntry {
                    node_id: "w1".into(),
                    host: "h".into(),
                    port: 1,
                    role: "worker".into(),
                    enabled: true,
                    timeout_sec: 30,
                    tags: vec![],
                    auth: AuthConfig::default(),
                },
                NodeEntry {
                    node_id: "w2".into(),
                    host: "h".into(),
                    port: 2,
                    role: "worker".into(),
                    enabled: false,
                    timeout_sec: 30,
                    tags: vec![],
                    auth: AuthConfig::default(),
                },
                NodeEntry {
                    node_id: "c1".into(),
                    host: "h".into(),
                    port: 3,
                    role: "controller".into(),
                    enabled: true,
                    timeout_sec: 30,
                    tags: vec![],
                    auth: AuthConfig::default(),
                },
            ],
        };
        let workers = schedulable_workers(&config);
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].node_id, "w1");
    }
}

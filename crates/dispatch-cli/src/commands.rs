// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared command implementations for the cluster dispatch CLI.
//!
//! These functions are library-level so they can be tested without
//! spawning the binary, mirroring `abp-cli::commands`'s split between
//! argument parsing (`main.rs`) and the actual work.

use anyhow::{Context as _, Result};
use dispatch_capability::{resolve_secret, ClusterConfig, WorkerRegistry};
use dispatch_controller::{LocalExecutor, Reconciler, Scheduler, SubmitResult};
use dispatch_core::Requirements;
use dispatch_executor::Registry;
use dispatch_receipt::ReceiptStore;
use std::path::Path;
use std::sync::Arc;

/// Env var consulted last in the secret resolution chain (spec §6).
pub const DEFAULT_SECRET_ENV: &str = "DISPATCH_SECRET";

/// Conventional "current" secret var, consulted between a node's configured
/// `secret_env` and [`DEFAULT_SECRET_ENV`] (spec §6, generalized from
/// `controller.py`'s `RAYVAULT_CLUSTER_SECRET_CURRENT`).
pub const DEFAULT_SECRET_CURRENT_ENV: &str = "DISPATCH_SECRET_CURRENT";

/// Everything a subcommand needs: a registry over the configured workers, a
/// scheduler wired to it, and the resolved secret.
pub struct Context {
    /// Registry over the cluster's configured worker nodes.
    pub registry: Arc<WorkerRegistry>,
    /// Scheduler wired to `registry` and the local fallback executor.
    pub scheduler: Scheduler,
    /// Reconciler used directly by `sync-artifacts` (outside a submit call).
    pub reconciler: Reconciler,
    /// Resolved shared secret, for subcommands that sign their own requests.
    pub secret: String,
}

/// Build a [`Context`] from a loaded [`ClusterConfig`] and the step
/// registrations the worker itself would use for local fallback.
pub fn build_context(
    config: &ClusterConfig,
    cli_secret: Option<&str>,
    executor: Registry,
) -> Result<Context> {
    let state_dir = config.state_dir.as_deref().unwrap_or(".dispatch-controller");
    let receipts = Arc::new(ReceiptStore::new(state_dir));

    let nodes: Vec<_> = dispatch_capability::schedulable_workers(config)
        .into_iter()
        .map(dispatch_capability::ClusterNode::from_entry)
        .collect();
    let registry = Arc::new(WorkerRegistry::new(nodes));

    let secret = resolve_secret(
        cli_secret,
        config.auth.secret_env.as_deref(),
        DEFAULT_SECRET_CURRENT_ENV,
        DEFAULT_SECRET_ENV,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let reconciler = Reconciler::new(
        receipts.clone(),
        config.controller.poll_interval_sec,
        config.controller.poll_timeout_sec,
    );
    let local = LocalExecutor::new(Arc::new(executor), receipts);
    let scheduler = Scheduler::new(
        registry.clone(),
        reconciler.clone(),
        local,
        secret.clone(),
        config.controller.mac_only_steps.clone(),
    );

    Ok(Context {
        registry,
        scheduler,
        reconciler,
        secret,
    })
}

/// Load and validate a [`ClusterConfig`] from `path`.
pub fn load_config(path: &Path) -> Result<ClusterConfig> {
    dispatch_capability::load_config(path).with_context(|| format!("loading cluster config '{}'", path.display()))
}

/// `health` subcommand: aggregate healthcheck across every configured node.
pub async fn cmd_health(ctx: &Context) -> Result<serde_json::Value> {
    let health = ctx.registry.healthcheck().await;
    Ok(serde_json::to_value(health)?)
}

/// `caps` subcommand: register capabilities with every node (or a single
/// `--node-id`) and print what each one reports.
pub async fn cmd_caps(ctx: &Context, node_id: Option<&str>) -> Result<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for node in ctx.registry.nodes() {
        if let Some(want) = node_id {
            if node.node_id != want {
                continue;
            }
        }
        match ctx.registry.register_caps(node, std::slice::from_ref(&ctx.secret)).await {
            Ok(caps) => {
                out.insert(node.node_id.clone(), serde_json::Value::Object(caps));
            }
            Err(e) => {
                out.insert(node.node_id.clone(), serde_json::json!({"error": e.to_string()}));
            }
        }
    }
    Ok(serde_json::Value::Object(out))
}

/// Options for the `submit` subcommand.
pub struct SubmitArgs<'a> {
    /// Caller-chosen run identifier.
    pub run_id: &'a str,
    /// Caller-chosen job identifier.
    pub job_id: &'a str,
    /// Step to execute.
    pub step_name: &'a str,
    /// Job payload.
    pub payload: serde_json::Value,
    /// Worker requirements the candidate must satisfy.
    pub requirements: Requirements,
    /// Precomputed inputs hash, or `None` to derive it from `payload`.
    pub inputs_hash: Option<String>,
    /// Bypass the local fallback cache.
    pub force: bool,
    /// Whether to fall back to local execution when no remote candidate succeeds.
    pub allow_local_fallback: bool,
}

/// `submit` subcommand: hand the job to the scheduler.
pub async fn cmd_submit(ctx: &Context, args: SubmitArgs<'_>) -> SubmitResult {
    ctx.scheduler
        .submit_job(
            args.run_id,
            args.job_id,
            args.step_name,
            &args.payload,
            &args.requirements,
            args.inputs_hash,
            args.force,
            args.allow_local_fallback,
        )
        .await
}

/// `sync-artifacts` subcommand: re-fetch an already-submitted remote job's
/// status, logs, and artifacts without resubmitting it.
pub async fn cmd_sync_artifacts(
    ctx: &Context,
    node_id: &str,
    run_id: &str,
    job_id: &str,
    step_name: &str,
    inputs_hash: &str,
) -> Result<SubmitResult> {
    let node = ctx
        .registry
        .nodes()
        .iter()
        .find(|n| n.node_id == node_id)
        .with_context(|| format!("unknown node_id '{node_id}'"))?;

    let (receipt_path, receipt) = ctx
        .reconciler
        .sync_artifacts(node, &ctx.secret, run_id, job_id, step_name, inputs_hash)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(SubmitResult {
        ok: receipt.is_success(),
        mode: "remote".to_string(),
        run_id: run_id.to_string(),
        job_id: job_id.to_string(),
        step_name: step_name.to_string(),
        status: receipt.status,
        node_id: node.node_id.clone(),
        idempotent: false,
        exit_code: receipt.exit_code,
        message: receipt.error_message,
        receipt_path: receipt_path.display().to_string(),
    })
}

/// Read a JSON value from a literal string or a file, whichever is `Some`.
/// Returns `Ok(default)` when neither is given.
pub fn read_json_arg(
    inline: Option<&str>,
    file: Option<&Path>,
    default: serde_json::Value,
) -> Result<serde_json::Value> {
    if let Some(raw) = inline {
        return serde_json::from_str(raw).context("parsing inline JSON argument");
    }
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading JSON file '{}'", path.display()))?;
        return serde_json::from_str(&content).with_context(|| format!("parsing JSON file '{}'", path.display()));
    }
    Ok(default)
}

/// Build the worker-side dispatch table used for local fallback execution.
///
/// Mirrors `dispatch-workerd`'s own `build_registry`; a fork in either place
/// should keep the other in sync since both are routing the same step set.
pub fn build_local_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("FFMPEG_PROBE", Box::new(dispatch_executor::EchoHandler));
    registry.register("AUDIO_POSTCHECK", Box::new(dispatch_executor::EchoHandler));
    registry.register("FRAME_SAMPLING", Box::new(dispatch_executor::ChunkCountHandler));
    registry.register("TTS_RENDER_CHUNKS", Box::new(dispatch_executor::ChunkCountHandler));
    registry
}

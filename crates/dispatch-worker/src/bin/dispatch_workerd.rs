// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use dispatch_core::CapabilityReport;
use dispatch_receipt::ReceiptStore;
use dispatch_worker::{build_app, AppState, JobQueue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dispatch-workerd", version, about = "Cluster dispatch worker daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8090")]
    bind: String,

    /// Stable identifier for this worker, reported in capability and health responses.
    #[arg(long)]
    worker_id: String,

    /// Shared HMAC secret this worker verifies request envelopes against.
    #[arg(long, env = "DISPATCH_WORKER_SECRET")]
    secret: String,

    /// Root directory for job output, receipts, and logs.
    #[arg(long, default_value = ".dispatch-worker")]
    state_dir: PathBuf,

    /// Allowed clock skew, in seconds, for incoming envelope timestamps.
    #[arg(long, default_value_t = dispatch_protocol::DEFAULT_SKEW_SECONDS)]
    skew_seconds: i64,

    /// Path to a JSON file describing this worker's capability report.
    #[arg(long)]
    caps_file: Option<PathBuf>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("dispatch=debug")
    } else {
        EnvFilter::new("dispatch=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tokio::fs::create_dir_all(&args.state_dir)
        .await
        .with_context(|| format!("create state dir {}", args.state_dir.display()))?;

    let caps = load_caps(args.caps_file.as_deref())
        .await
        .context("loading capability report")?;

    let receipts = Arc::new(ReceiptStore::new(args.state_dir.clone()));
    let (queue, fifo) = JobQueue::new(args.worker_id.clone(), receipts.clone());

    let registry = Arc::new(build_registry());
    tokio::spawn(dispatch_worker::run_loop(queue.clone(), fifo, registry, args.state_dir.clone()));

    let state = Arc::new(AppState {
        secret: args.secret.clone(),
        queue,
        receipts,
        worker_id: args.worker_id.clone(),
        caps,
        skew_seconds: args.skew_seconds,
    });

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, worker_id = %args.worker_id, "dispatch-workerd listening");

    axum::serve(listener, app).await.context("serve")
}

async fn load_caps(path: Option<&std::path::Path>) -> Result<CapabilityReport> {
    let Some(path) = path else {
        return Ok(CapabilityReport::new());
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading caps file {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing caps file {}", path.display()))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("caps file {} must contain a JSON object, got {other:?}", path.display()),
    }
}

fn build_registry() -> dispatch_executor::Registry {
    let mut registry = dispatch_executor::Registry::new();
    registry.register("FFMPEG_PROBE", Box::new(dispatch_executor::EchoHandler));
    registry.register("AUDIO_POSTCHECK", Box::new(dispatch_executor::EchoHandler));
    registry.register("FRAME_SAMPLING", Box::new(dispatch_executor::ChunkCountHandler));
    registry.register("TTS_RENDER_CHUNKS", Box::new(dispatch_executor::ChunkCountHandler));
    registry
}

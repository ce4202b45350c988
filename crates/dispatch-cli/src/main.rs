// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dispatch_cli::commands::{self, SubmitArgs};
use dispatch_core::Requirements;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for a soft failure: the remote submission failed but the job
/// still completed via local fallback (spec §6).
const EXIT_SOFT_FAILURE: i32 = 2;
/// Exit code for configuration and setup errors.
const EXIT_CONFIG_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "dispatchctl", version, about = "Cluster dispatch controller CLI")]
struct Cli {
    /// Path to the cluster node configuration file.
    #[arg(long, default_value = "cluster.json")]
    config: PathBuf,

    /// Shared HMAC secret; overrides the config's `auth.secret_env` chain.
    #[arg(long, env = "DISPATCH_SECRET")]
    secret: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Healthcheck every configured worker node.
    Health,

    /// Register capabilities with the cluster and print what each node reports.
    Caps {
        /// Limit to a single node.
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Submit a job to the cluster, falling back locally when allowed.
    Submit {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        step_name: String,

        /// Inline JSON payload.
        #[arg(long, conflicts_with = "payload_file")]
        payload_json: Option<String>,
        /// Path to a JSON payload file.
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Inline JSON requirements object.
        #[arg(long, conflicts_with = "requirements_file")]
        requirements_json: Option<String>,
        /// Path to a JSON requirements file.
        #[arg(long)]
        requirements_file: Option<PathBuf>,

        /// Precomputed inputs hash; computed from the payload if omitted.
        #[arg(long)]
        inputs_hash: Option<String>,

        /// Bypass the local fallback cache.
        #[arg(long)]
        force: bool,

        /// Disallow falling back to local execution.
        #[arg(long)]
        no_local_fallback: bool,
    },

    /// Re-fetch an already-submitted remote job's status, logs, and artifacts.
    SyncArtifacts {
        #[arg(long)]
        node_id: String,
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        step_name: String,
        #[arg(long)]
        inputs_hash: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("dispatch=debug")
    } else {
        EnvFilter::new("dispatch=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = commands::load_config(&cli.config)?;
    let ctx = commands::build_context(&config, cli.secret.as_deref(), commands::build_local_registry())
        .context("building controller context")?;

    match cli.command {
        Commands::Health => {
            let value = commands::cmd_health(&ctx).await?;
            print_json(&value);
            Ok(0)
        }

        Commands::Caps { node_id } => {
            let value = commands::cmd_caps(&ctx, node_id.as_deref()).await?;
            print_json(&value);
            Ok(0)
        }

        Commands::Submit {
            run_id,
            job_id,
            step_name,
            payload_json,
            payload_file,
            requirements_json,
            requirements_file,
            inputs_hash,
            force,
            no_local_fallback,
        } => {
            let payload = commands::read_json_arg(
                payload_json.as_deref(),
                payload_file.as_deref(),
                serde_json::json!({}),
            )?;
            let requirements_value = commands::read_json_arg(
                requirements_json.as_deref(),
                requirements_file.as_deref(),
                serde_json::json!({}),
            )?;
            let requirements: Requirements =
                serde_json::from_value(requirements_value).context("parsing --requirements-json/--requirements-file")?;

            let result = commands::cmd_submit(
                &ctx,
                SubmitArgs {
                    run_id: &run_id,
                    job_id: &job_id,
                    step_name: &step_name,
                    payload,
                    requirements,
                    inputs_hash,
                    force,
                    allow_local_fallback: !no_local_fallback,
                },
            )
            .await;

            print_json(&serde_json::to_value(&result)?);
            Ok(exit_code_for(&result))
        }

        Commands::SyncArtifacts {
            node_id,
            run_id,
            job_id,
            step_name,
            inputs_hash,
        } => {
            let result =
                commands::cmd_sync_artifacts(&ctx, &node_id, &run_id, &job_id, &step_name, &inputs_hash).await?;
            print_json(&serde_json::to_value(&result)?);
            Ok(exit_code_for(&result))
        }
    }
}

/// 0 on a clean success, 2 on a soft failure (remote failed, local fallback
/// carried the job), mirroring spec §6's CLI exit code table.
fn exit_code_for(result: &dispatch_controller::SubmitResult) -> i32 {
    if !result.ok {
        return EXIT_CONFIG_ERROR;
    }
    if result.mode == "local" && !result.message.is_empty() {
        return EXIT_SOFT_FAILURE;
    }
    0
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

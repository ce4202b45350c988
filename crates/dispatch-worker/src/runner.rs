//! Background runner loop (spec §4.6 "runner loop").

use crate::queue::{log_line, JobFifo, JobQueue};
use dispatch_core::{utc_now_iso, JobStatus};
use dispatch_executor::{ExecutionContext, Registry};
use dispatch_receipt::ReceiptStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Drive jobs from `fifo` through the dispatch table until the channel closes.
///
/// Transitions `queued -> running -> {succeeded|failed}` exactly once per
/// job, always writing the receipt before considering the job's FIFO slot
/// done (spec §4.6: "Always write the receipt before marking the FIFO slot
/// done"). A handler panic is caught so one bad job can't take the whole
/// runner down; it is recorded as `UNHANDLED_EXCEPTION`, mirroring the
/// Python's blanket `except Exception`.
pub async fn run(queue: JobQueue, mut fifo: JobFifo, registry: Arc<Registry>, workspace_root: PathBuf) {
    let receipt_store = ReceiptStore::new(&workspace_root);

    while let Some(job_id) = fifo.recv().await {
        let Some(record) = queue.get(&job_id) else {
            continue;
        };

        queue.update(&job_id, |r| {
            r.status = JobStatus::Running;
            r.progress = 0.1;
            r.message = "running".to_string();
            r.started_at = utc_now_iso();
        });
        info!(job_id = %job_id, "job started");
        let line = log_line(&job_id, "worker_log", "info", "running");
        if let Err(e) = receipt_store.append_log(&record.run_id, &job_id, &line) {
            warn!(job_id = %job_id, error = %e, "failed to append running log line");
        }

        let ctx = ExecutionContext {
            workspace_root: workspace_root.clone(),
            run_id: record.run_id.clone(),
            job_id: record.job_id.clone(),
        };
        let payload = record.payload.clone();
        let step_name = record.step_name.clone();

        let registry_ref = registry.clone();
        let outcome = tokio::task::spawn_blocking(move || registry_ref.dispatch(&step_name, &payload, &ctx))
            .await
            .map_err(|e| format!("handler panicked: {e}"));

        match outcome {
            Ok(Ok(result)) => {
                queue.update(&job_id, |r| {
                    r.status = JobStatus::Succeeded;
                    r.progress = 1.0;
                    r.message = "succeeded".to_string();
                    r.exit_code = 0;
                    r.metrics = result.metrics;
                    r.artifacts = result.artifacts;
                    r.finished_at = utc_now_iso();
                });
            }
            Ok(Err(err)) => {
                warn!(job_id = %job_id, code = %err.code(), "job failed");
                queue.update(&job_id, |r| {
                    r.status = JobStatus::Failed;
                    r.progress = 1.0;
                    r.message = err.message().to_string();
                    r.exit_code = 2;
                    r.error_code = err.code().to_string();
                    r.error_message = err.message().to_string();
                    r.finished_at = utc_now_iso();
                });
            }
            Err(panic_msg) => {
                warn!(job_id = %job_id, "job handler panicked");
                queue.update(&job_id, |r| {
                    r.status = JobStatus::Failed;
                    r.progress = 1.0;
                    r.message = panic_msg.clone();
                    r.exit_code = 1;
                    r.error_code = "UNHANDLED_EXCEPTION".to_string();
                    r.error_message = panic_msg.clone();
                    r.finished_at = utc_now_iso();
                });
            }
        }

        if let Some(finished) = queue.get(&job_id) {
            let line = log_line(
                &job_id,
                "worker_log",
                "info",
                &format!("finished status={} exit={}", finished.status, finished.exit_code),
            );
            if let Err(e) = receipt_store.append_log(&finished.run_id, &job_id, &line) {
                warn!(job_id = %job_id, error = %e, "failed to append worker log");
            }
            let receipt = crate::convert::receipt_from_record(&finished);
            if let Err(e) = receipt_store.write_receipt(&finished.run_id, &job_id, &receipt) {
                warn!(job_id = %job_id, error = %e, "failed to write receipt");
            }
        }
    }
}

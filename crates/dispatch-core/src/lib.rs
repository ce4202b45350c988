// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Shared domain types and error taxonomy for the cluster dispatch core.
//!
//! This crate has no I/O of its own. It defines the vocabulary that the
//! protocol, executor, receipt, capability, worker and controller crates
//! all speak: job status, artifacts, receipts, and a stable error code
//! taxonomy, following the same split `abp-core`/`abp-error` use upstream.

mod error;
mod steps;

pub use error::{ErrorCategory, ErrorCode, DispatchError};
pub use steps::{is_job_step, is_control_step, is_supported_step, normalize_step_name, JOB_STEPS, CONTROL_STEPS};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current time as an RFC 3339 / ISO-8601 UTC string ending in `Z`.
#[must_use]
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Opaque JSON payload carried alongside an envelope.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Free-form capability report published by a worker (§3 "Capability report").
pub type CapabilityReport = serde_json::Map<String, serde_json::Value>;

/// Terminal and non-terminal job states (§4.6 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued, not yet picked up by the runner.
    Queued,
    /// Picked up and currently executing.
    Running,
    /// Completed successfully. Terminal.
    Succeeded,
    /// Completed with a failure. Terminal.
    Failed,
}

impl JobStatus {
    /// Terminal statuses are `Succeeded` and `Failed`; no other state ends a job.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A single downloaded or produced artifact (§3 "Job artifact").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifact {
    /// Filesystem path of the artifact (local to whichever side produced it).
    pub path: String,
    /// Hex-encoded SHA-256 of the artifact bytes.
    pub sha256: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Mutable worker-side record of a job, owned exclusively by the queue
/// (§3 "Job record (worker-side)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// `run_id` from the originating envelope.
    pub run_id: String,
    /// `job_id` from the originating envelope.
    pub job_id: String,
    /// Normalized step name.
    pub step_name: String,
    /// `inputs_hash` from the originating envelope.
    pub inputs_hash: String,
    /// The job's input payload, as submitted alongside the envelope.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Fractional progress in `[0.0, 1.0]`.
    pub progress: f64,
    /// Human-readable status message.
    pub message: String,
    /// When the record was created (enqueue time).
    pub created_at: String,
    /// When the runner picked the job up, empty until then.
    pub started_at: String,
    /// When the job reached a terminal state, empty until then.
    pub finished_at: String,
    /// Process-style exit code; `0` on success.
    pub exit_code: i32,
    /// Handler-reported metrics.
    pub metrics: serde_json::Map<String, serde_json::Value>,
    /// Produced artifacts, in handler-reported order.
    pub artifacts: Vec<JobArtifact>,
    /// Short machine-readable failure tag, empty unless failed.
    pub error_code: String,
    /// Human-readable failure detail, empty unless failed.
    pub error_message: String,
    /// Set once this record was returned in response to a deduplicated enqueue.
    pub idempotent: bool,
    /// The job_id this record was deduplicated against, if any.
    pub cached_job_id: String,
    /// Identifier of the worker process that owns this record.
    pub worker_id: String,
    /// Path to this job's append-only log file.
    pub log_path: String,
    /// Path to this job's persisted receipt, once written.
    pub receipt_path: String,
}

impl JobRecord {
    /// Build a fresh `queued` record for a newly accepted envelope.
    #[must_use]
    pub fn new_queued(
        run_id: impl Into<String>,
        job_id: impl Into<String>,
        step_name: impl Into<String>,
        inputs_hash: impl Into<String>,
        payload: serde_json::Value,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            job_id: job_id.into(),
            step_name: step_name.into(),
            inputs_hash: inputs_hash.into(),
            payload,
            status: JobStatus::Queued,
            progress: 0.0,
            message: "queued".to_string(),
            created_at: utc_now_iso(),
            started_at: String::new(),
            finished_at: String::new(),
            exit_code: 0,
            metrics: serde_json::Map::new(),
            artifacts: Vec::new(),
            error_code: String::new(),
            error_message: String::new(),
            idempotent: false,
            cached_job_id: String::new(),
            worker_id: worker_id.into(),
            log_path: String::new(),
            receipt_path: String::new(),
        }
    }
}

/// How a job reached its terminal state (§3 "Receipt" `mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptMode {
    /// Executed on a remote worker.
    Remote,
    /// Executed synchronously on the controller host.
    Local,
    /// Served from the local fingerprint-keyed cache without re-executing.
    LocalCached,
}

impl std::fmt::Display for ReceiptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReceiptMode::Remote => "remote",
            ReceiptMode::Local => "local",
            ReceiptMode::LocalCached => "local_cached",
        };
        f.write_str(s)
    }
}

/// The durable record of a finished job, remote or local (§3 "Receipt").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// How this job was executed.
    pub mode: ReceiptMode,
    /// `run_id` of the job.
    pub run_id: String,
    /// `job_id` of the job.
    pub job_id: String,
    /// Normalized step name.
    pub step_name: String,
    /// `inputs_hash` of the job.
    pub inputs_hash: String,
    /// Owning worker's node id, or `"local"` for local execution.
    pub node_id: String,
    /// Terminal status as a plain string (`succeeded` / `failed`).
    pub status: String,
    /// Process-style exit code.
    pub exit_code: i32,
    /// When execution started.
    #[serde(default)]
    pub started_at: String,
    /// When execution finished.
    pub finished_at: String,
    /// Wall-clock duration of execution, if known.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Handler-reported metrics.
    #[serde(default)]
    pub metrics: serde_json::Map<String, serde_json::Value>,
    /// Artifacts, with local paths they were stored at.
    #[serde(default)]
    pub artifacts: Vec<JobArtifact>,
    /// Path to the log file captured alongside this receipt.
    #[serde(default)]
    pub log_path: String,
    /// Failure code, empty on success.
    #[serde(default)]
    pub error_code: String,
    /// Failure detail, empty on success.
    #[serde(default)]
    pub error_message: String,
    /// Artifacts whose downloaded SHA-256 did not match what the worker reported.
    #[serde(default)]
    pub artifact_mismatches: Vec<String>,
}

impl Receipt {
    /// `true` when `status == "succeeded"` (the central success rule lives
    /// in `dispatch-controller::reconcile::classify_success`; this is a
    /// convenience accessor for the already-classified receipt).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Entry in the local fallback's fingerprint-keyed cache (§3 "Local cache entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheEntry {
    /// Whether the cached execution succeeded.
    pub ok: bool,
    /// Terminal status string.
    pub status: String,
    /// Process-style exit code.
    pub exit_code: i32,
    /// Path to the full receipt this entry points at.
    pub receipt_path: String,
}

/// Requirement keys recognized by capability matching (§4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Allowed OS strings, compared case-insensitively.
    #[serde(default)]
    pub os_in: Vec<String>,
    /// Minimum RAM in GB.
    #[serde(default)]
    pub min_ram_gb: Option<f64>,
    /// Minimum VRAM in GB.
    #[serde(default)]
    pub min_vram_gb: Option<f64>,
    /// Whether a GPU is required.
    #[serde(default)]
    pub gpu_required: bool,
    /// Whether `davinci_available` must be true in the worker's caps.
    #[serde(default)]
    pub davinci_available: bool,
}

impl Requirements {
    /// `true` when every field is at its default (no requirement imposed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.os_in.is_empty()
            && self.min_ram_gb.is_none()
            && self.min_vram_gb.is_none()
            && !self.gpu_required
            && !self.davinci_available
    }
}

/// Generic key-value bag used for request metadata that doesn't warrant its
/// own type (mirrors how `abp-core` keeps free-form JSON at plugin seams).
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn requirements_empty_by_default() {
        assert!(Requirements::default().is_empty());
    }

    #[test]
    fn new_queued_record_has_sane_defaults() {
        let rec = JobRecord::new_queued("run1", "job1", "TTS_RENDER_CHUNKS", "abc123", serde_json::Value::Null, "worker-1");
        assert_eq!(rec.status, JobStatus::Queued);
        assert_eq!(rec.progress, 0.0);
        assert!(!rec.idempotent);
        assert!(rec.started_at.is_empty());
    }

    #[test]
    fn receipt_round_trips_through_json() {
        let r = Receipt {
            mode: ReceiptMode::Remote,
            run_id: "r".into(),
            job_id: "j".into(),
            step_name: "TTS_RENDER_CHUNKS".into(),
            inputs_hash: "a".repeat(16),
            node_id: "worker-1".into(),
            status: "succeeded".into(),
            exit_code: 0,
            started_at: utc_now_iso(),
            finished_at: utc_now_iso(),
            duration_ms: Some(42),
            metrics: serde_json::Map::new(),
            artifacts: vec![],
            log_path: String::new(),
            error_code: String::new(),
            error_message: String::new(),
            artifact_mismatches: vec![],
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: Receipt = serde_json::from_str(&json).unwrap();
        assert!(back.is_success());
        assert_eq!(back.duration_ms, Some(42));
    }
}

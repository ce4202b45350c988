//! Controller-facing result type (spec §4.8 `SubmitResult`).

use serde::Serialize;

/// Outcome of a `submit_job` call, remote or local, success or failure.
///
/// Grounded on `original_source/rayvault/agent/controller.py::SubmitResult`,
/// kept field-for-field so the CLI's JSON output matches what operators
/// already expect from the original tool.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    /// `true` iff the job reached a successful terminal state.
    pub ok: bool,
    /// `"remote"`, `"local"`, or `"local_cached"`.
    pub mode: String,
    /// `run_id` of the job.
    pub run_id: String,
    /// `job_id` of the job (may be worker-assigned for remote jobs).
    pub job_id: String,
    /// Normalized step name.
    pub step_name: String,
    /// Terminal status as reported by whichever side executed the job.
    pub status: String,
    /// Node that executed the job, or `"local"`.
    #[serde(default)]
    pub node_id: String,
    /// `true` if this result came from a dedup/cache hit rather than a fresh run.
    #[serde(default)]
    pub idempotent: bool,
    /// Process-style exit code.
    #[serde(default)]
    pub exit_code: i32,
    /// Human-readable explanation, populated on fallback or failure.
    #[serde(default)]
    pub message: String,
    /// Path to the written receipt.
    #[serde(default)]
    pub receipt_path: String,
}

impl SubmitResult {
    /// Prefix `extra` onto `self.message`, joined with `"; "` if both are non-empty.
    ///
    /// Used when a local fallback follows a remote failure: the fallback's
    /// own message (if any) is kept, with the remote failure reason in front.
    pub fn annotate(&mut self, extra: &str) {
        if extra.is_empty() {
            return;
        }
        self.message = if self.message.is_empty() {
            extra.to_string()
        } else {
            format!("{extra}; {}", self.message)
        };
    }
}

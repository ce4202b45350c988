//! Receipt store: the on-disk layout under `<state_dir>` (spec §4.3).

use crate::atomic::{atomic_write_bytes, atomic_write_json};
use dispatch_core::{DispatchError, ErrorCode, Receipt};
use std::path::{Path, PathBuf};

/// Owns the `<state_dir>/receipts/` tree.
pub struct ReceiptStore {
    state_dir: PathBuf,
}

impl ReceiptStore {
    /// Open a receipt store rooted at `state_dir` (created if missing).
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// `<state_dir>/receipts/<run_id>/<job_id>/`.
    #[must_use]
    pub fn receipt_dir(&self, run_id: &str, job_id: &str) -> PathBuf {
        self.state_dir.join("receipts").join(run_id).join(job_id)
    }

    /// `<receipt_dir>/job_receipt.json`.
    #[must_use]
    pub fn receipt_path(&self, run_id: &str, job_id: &str) -> PathBuf {
        self.receipt_dir(run_id, job_id).join("job_receipt.json")
    }

    /// `<receipt_dir>/worker.log`.
    #[must_use]
    pub fn log_path(&self, run_id: &str, job_id: &str) -> PathBuf {
        self.receipt_dir(run_id, job_id).join("worker.log")
    }

    /// `<receipt_dir>/artifacts/`.
    #[must_use]
    pub fn artifacts_dir(&self, run_id: &str, job_id: &str) -> PathBuf {
        self.receipt_dir(run_id, job_id).join("artifacts")
    }

    /// `<receipt_dir>/artifacts.zip`.
    #[must_use]
    pub fn artifacts_zip_path(&self, run_id: &str, job_id: &str) -> PathBuf {
        self.receipt_dir(run_id, job_id).join("artifacts.zip")
    }

    /// Write the terminal receipt for `(run_id, job_id)` atomically.
    ///
    /// Receipts are written once per `(run_id, job_id)` per spec §8
    /// invariant 3; callers that need idempotent re-submission should check
    /// [`ReceiptStore::read_receipt`] before calling this again.
    pub fn write_receipt(&self, run_id: &str, job_id: &str, receipt: &Receipt) -> Result<PathBuf, DispatchError> {
        let path = self.receipt_path(run_id, job_id);
        atomic_write_json(&path, receipt)?;
        Ok(path)
    }

    /// Read back a previously written receipt, if present.
    pub fn read_receipt(&self, run_id: &str, job_id: &str) -> Result<Option<Receipt>, DispatchError> {
        let path = self.receipt_path(run_id, job_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| DispatchError::new(ErrorCode::NotFound, format!("cannot read {path:?}: {e}")))?;
        let receipt = serde_json::from_slice(&bytes)
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("corrupt receipt {path:?}: {e}")))?;
        Ok(Some(receipt))
    }

    /// Append a line to the job's durable worker log, creating it if needed.
    ///
    /// This is a protocol artifact the client reads back via `/job/{id}/logs`,
    /// distinct from `tracing`-based process logging (see crate docs).
    pub fn append_log(&self, run_id: &str, job_id: &str, line: &str) -> Result<(), DispatchError> {
        use std::io::Write;
        let path = self.log_path(run_id, job_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot create {parent:?}: {e}")))?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot open {path:?}: {e}")))?;
        writeln!(f, "{line}")
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot append {path:?}: {e}")))?;
        Ok(())
    }

    /// Resolve a safe artifact filename under this job's `artifacts/` dir,
    /// rejecting anything that would resolve outside it.
    ///
    /// Path separators in `name` are first flattened to underscores (spec
    /// §4.3 "Safe-name rule"); the result is then re-checked by
    /// canonicalizing its would-be parent against the artifacts directory,
    /// since a name like `..` still needs rejecting even after flattening.
    pub fn safe_artifact_path(&self, run_id: &str, job_id: &str, name: &str) -> Result<PathBuf, DispatchError> {
        let flattened = name.replace(['/', '\\'], "_");
        if flattened.is_empty() || flattened == "." || flattened == ".." {
            return Err(DispatchError::new(ErrorCode::PathEscape, format!("unsafe artifact name: {name:?}")));
        }
        let dir = self.artifacts_dir(run_id, job_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot create {dir:?}: {e}")))?;
        let candidate = dir.join(&flattened);
        let dir_real = dir
            .canonicalize()
            .map_err(|e| DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot resolve {dir:?}: {e}")))?;
        let parent = candidate.parent().unwrap_or(&candidate);
        if parent != dir_real {
            return Err(DispatchError::new(ErrorCode::PathEscape, format!("artifact escapes receipt dir: {candidate:?}")));
        }
        Ok(candidate)
    }

    /// Atomically write a downloaded artifact's bytes to its safe path.
    pub fn write_artifact(&self, run_id: &str, job_id: &str, name: &str, bytes: &[u8]) -> Result<PathBuf, DispatchError> {
        let path = self.safe_artifact_path(run_id, job_id, name)?;
        atomic_write_bytes(&path, bytes)?;
        Ok(path)
    }

    /// Root directory this store was opened with.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::ReceiptMode;

    fn sample_receipt() -> Receipt {
        Receipt {
            mode: ReceiptMode::Remote,
            run_id: "run1".into(),
            job_id: "job1".into(),
            step_name: "FFMPEG_PROBE".into(),
            inputs_hash: "a".repeat(16),
            node_id: "worker-1".into(),
            status: "succeeded".into(),
            exit_code: 0,
            started_at: String::new(),
            finished_at: String::new(),
            duration_ms: Some(10),
            metrics: serde_json::Map::new(),
            artifacts: vec![],
            log_path: String::new(),
            error_code: String::new(),
            error_message: String::new(),
            artifact_mismatches: vec![],
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path());
        store.write_receipt("run1", "job1", &sample_receipt()).unwrap();
        let back = store.read_receipt("run1", "job1").unwrap().unwrap();
        assert_eq!(back.job_id, "job1");
    }

    #[test]
    fn missing_receipt_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path());
        assert!(store.read_receipt("run1", "nope").unwrap().is_none());
    }

    #[test]
    fn safe_artifact_path_flattens_separators() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path());
        let path = store.safe_artifact_path("run1", "job1", "sub/dir/out.wav").unwrap();
        assert_eq!(path.file_name().unwrap(), "sub_dir_out.wav");
    }

    #[test]
    fn safe_artifact_path_rejects_dotdot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path());
        let err = store.safe_artifact_path("run1", "job1", "..").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathEscape);
    }

    #[test]
    fn append_log_creates_and_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path());
        store.append_log("run1", "job1", "line one").unwrap();
        store.append_log("run1", "job1", "line two").unwrap();
        let content = std::fs::read_to_string(store.log_path("run1", "job1")).unwrap();
        assert_eq!(content, "line one\nline two\n");
    }
}

//! Illustrative handlers.
//!
//! Concrete step executors (media rendering, TTS, probing tools) are out of
//! scope; these two handlers exercise the queue, sandboxed output dir, and
//! artifact hashing end to end without shelling out to anything.

use crate::registry::{ExecutionContext, ExecutionOutcome, JobHandler};
use crate::safe_path::safe_output_dir;
use dispatch_core::{DispatchError, ErrorCode, JobArtifact};
use sha2::{Digest, Sha256};
use std::io::Write;

/// Writes the job's payload back out as a single JSON artifact.
///
/// Useful as a smoke-test handler: it proves the sandboxed output path,
/// artifact hashing, and metrics plumbing all work without any real media
/// tooling installed.
pub struct EchoHandler;

impl JobHandler for EchoHandler {
    fn execute(
        &self,
        payload: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let requested = payload.get("output_dir").and_then(|v| v.as_str());
        let out_dir = safe_output_dir(
            &ctx.workspace_root,
            requested,
            &format!("artifacts/{}/echo", ctx.job_id),
        )?;

        let body = serde_json::to_vec_pretty(payload)
            .map_err(|e| DispatchError::new(ErrorCode::InvalidInput, format!("payload not serializable: {e}")))?;

        let path = out_dir.join("echo.json");
        let mut f = std::fs::File::create(&path)
            .map_err(|e| DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot create {path:?}: {e}")))?;
        f.write_all(&body)
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot write {path:?}: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(&body);
        let artifact = JobArtifact {
            path: path.to_string_lossy().into_owned(),
            sha256: hex::encode(hasher.finalize()),
            size_bytes: body.len() as u64,
        };

        let mut metrics = serde_json::Map::new();
        metrics.insert("bytes_written".into(), serde_json::json!(body.len()));

        Ok(ExecutionOutcome {
            metrics,
            artifacts: vec![artifact],
        })
    }
}

/// Validates payload shape and reports metrics without touching disk.
///
/// Fails with `INVALID_INPUT` unless `payload.chunks` is a non-empty array,
/// mirroring the shape check `original_source` performs before any real
/// rendering work begins (`_execute_tts_render_chunks`).
pub struct ChunkCountHandler;

impl JobHandler for ChunkCountHandler {
    fn execute(
        &self,
        payload: &serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let chunks = payload
            .get("chunks")
            .and_then(|v| v.as_array())
            .filter(|arr| !arr.is_empty())
            .ok_or_else(|| DispatchError::new(ErrorCode::InvalidInput, "payload.chunks must be a non-empty list"))?;

        let mut metrics = serde_json::Map::new();
        metrics.insert("chunk_count".into(), serde_json::json!(chunks.len()));

        Ok(ExecutionOutcome {
            metrics,
            artifacts: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &std::path::Path) -> ExecutionContext {
        ExecutionContext {
            workspace_root: root.to_path_buf(),
            run_id: "run1".into(),
            job_id: "job1".into(),
        }
    }

    #[test]
    fn echo_handler_writes_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = EchoHandler.execute(&serde_json::json!({"a": 1}), &ctx(tmp.path())).unwrap();
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].sha256.len(), 64);
    }

    #[test]
    fn chunk_count_handler_rejects_empty_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ChunkCountHandler.execute(&serde_json::json!({"chunks": []}), &ctx(tmp.path())).unwrap_err();
        assert_eq!(err.code(), dispatch_core::ErrorCode::InvalidInput);
    }

    #[test]
    fn chunk_count_handler_reports_metric() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = ChunkCountHandler
            .execute(&serde_json::json!({"chunks": [1, 2, 3]}), &ctx(tmp.path()))
            .unwrap();
        assert_eq!(outcome.metrics.get("chunk_count").unwrap(), 3);
    }
}

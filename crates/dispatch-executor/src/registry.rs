//! Typed dispatch table keyed by `step_name` (spec §4.5 "Job executor").

use dispatch_core::{DispatchError, ErrorCode, JobArtifact};
use std::collections::HashMap;
use std::path::PathBuf;

/// Filesystem and identity context a handler executes with.
pub struct ExecutionContext {
    /// Root directory all handler output must stay inside.
    pub workspace_root: PathBuf,
    /// `run_id` of the job being executed.
    pub run_id: String,
    /// `job_id` of the job being executed.
    pub job_id: String,
}

/// What a handler produced on success.
#[derive(Debug, Default, Clone)]
pub struct ExecutionOutcome {
    /// Free-form numeric/string metrics to attach to the receipt.
    pub metrics: serde_json::Map<String, serde_json::Value>,
    /// Artifacts produced, already hashed.
    pub artifacts: Vec<JobArtifact>,
}

/// A single step implementation. Real deployments implement this for each
/// concrete step (media rendering, TTS, probing, ...); this workspace ships
/// only illustrative handlers since those concrete executors are out of
/// scope here.
pub trait JobHandler: Send + Sync {
    /// Run the step against `payload`, writing any output under
    /// `ctx.workspace_root` via [`crate::safe_output_dir`].
    fn execute(
        &self,
        payload: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, DispatchError>;
}

/// Maps normalized `step_name` to its [`JobHandler`].
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, Box<dyn JobHandler>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `step_name`, overwriting any prior entry.
    pub fn register(&mut self, step_name: impl Into<String>, handler: Box<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(step_name.into(), handler);
        self
    }

    /// Run the handler registered for `step_name`.
    ///
    /// Returns `StepUnsupported` if nothing is registered, matching how
    /// the worker's queue classifies an unknown step at enqueue time.
    pub fn dispatch(
        &self,
        step_name: &str,
        payload: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let handler = self.handlers.get(step_name).ok_or_else(|| {
            DispatchError::new(ErrorCode::StepUnsupported, format!("no handler registered for {step_name}"))
        })?;
        handler.execute(payload, ctx)
    }

    /// `true` if a handler is registered for `step_name`.
    #[must_use]
    pub fn supports(&self, step_name: &str) -> bool {
        self.handlers.contains_key(step_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::EchoHandler;

    #[test]
    fn dispatch_fails_closed_for_unregistered_step() {
        let registry = Registry::new();
        let ctx = ExecutionContext {
            workspace_root: std::env::temp_dir(),
            run_id: "r".into(),
            job_id: "j".into(),
        };
        let err = registry.dispatch("FFMPEG_PROBE", &serde_json::json!({}), &ctx).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StepUnsupported);
    }

    #[test]
    fn registered_handler_is_invoked() {
        let mut registry = Registry::new();
        registry.register("FFMPEG_PROBE", Box::new(EchoHandler));
        assert!(registry.supports("FFMPEG_PROBE"));
    }
}

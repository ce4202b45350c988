//! Stable error taxonomy shared across the dispatch crates.
//!
//! Follows the `abp-error` split: a small [`ErrorCategory`] for grouping,
//! and a flat [`ErrorCode`] enum whose `SCREAMING_SNAKE_CASE` serde form is
//! the wire-visible tag clients match on (spec §7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse grouping of [`ErrorCode`] variants, used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request-envelope validation failures (auth, shape, timestamp).
    Envelope,
    /// Scheduling and placement failures on the controller side.
    Scheduling,
    /// Job execution failures on the worker side.
    Execution,
    /// Filesystem and artifact-handling failures.
    Storage,
    /// Configuration and setup failures.
    Config,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Envelope => "envelope",
            ErrorCategory::Scheduling => "scheduling",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Config => "config",
        };
        f.write_str(s)
    }
}

/// Stable, wire-visible error tag (spec §7, plus ambient-stack additions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Envelope --
    /// HMAC signature did not verify against the shared secret.
    AuthFailed,
    /// Envelope is missing a required field or a field has the wrong shape.
    MalformedEnvelope,
    /// Envelope timestamp is outside the allowed clock-skew window.
    TimestampSkew,
    /// `inputs_hash` is shorter than the minimum required length.
    InputsHashShort,

    // -- Scheduling --
    /// No step handler exists for the requested `step_name`.
    StepUnsupported,
    /// No worker in the cluster currently meets the job's requirements.
    NoEligibleWorker,
    /// The remote worker rejected or failed to accept a submitted job.
    RemoteSubmitFailed,
    /// A remote operation did not complete within its allotted time.
    Timeout,
    /// A worker rejected authentication under every acceptable secret while
    /// registering capabilities.
    CapsUnavailable,

    // -- Execution --
    /// Referenced job, run, or resource does not exist.
    NotFound,
    /// A job resubmitted under an existing `job_id` does not match the
    /// original envelope's `step_name` or `inputs_hash`.
    EnvelopeMismatch,
    /// A job handler exited non-zero or its underlying command failed.
    CommandFailed,
    /// A job handler received inputs it could not process.
    InvalidInput,
    /// An unexpected error surfaced while executing a job.
    UnhandledException,

    // -- Storage --
    /// A resolved path would escape the job's sandboxed output directory.
    PathEscape,
    /// The configured output directory is missing or not writable.
    InvalidOutputDir,
    /// A downloaded artifact's SHA-256 did not match what the worker reported.
    ArtifactHashMismatch,

    // -- Config --
    /// A required secret (auth token) could not be resolved from any source.
    MissingSecret,
}

impl ErrorCode {
    /// The [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::AuthFailed
            | ErrorCode::MalformedEnvelope
            | ErrorCode::TimestampSkew
            | ErrorCode::InputsHashShort => ErrorCategory::Envelope,
            ErrorCode::StepUnsupported
            | ErrorCode::NoEligibleWorker
            | ErrorCode::RemoteSubmitFailed
            | ErrorCode::Timeout
            | ErrorCode::CapsUnavailable => ErrorCategory::Scheduling,
            ErrorCode::NotFound
            | ErrorCode::EnvelopeMismatch
            | ErrorCode::CommandFailed
            | ErrorCode::InvalidInput
            | ErrorCode::UnhandledException => ErrorCategory::Execution,
            ErrorCode::PathEscape | ErrorCode::InvalidOutputDir | ErrorCode::ArtifactHashMismatch => {
                ErrorCategory::Storage
            }
            ErrorCode::MissingSecret => ErrorCategory::Config,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_value(self).unwrap_or_default();
        f.write_str(json.as_str().unwrap_or("UNKNOWN"))
    }
}

/// Error type returned across dispatch-core aware crate boundaries.
///
/// Carries a stable [`ErrorCode`] plus a human-readable message, so callers
/// can either match on `.code()` or bubble the `Display` text up through
/// `anyhow` at a binary's top level.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct DispatchError {
    code: ErrorCode,
    message: String,
}

impl DispatchError {
    /// Construct a new error with the given stable code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable detail message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

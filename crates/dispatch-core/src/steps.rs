//! Closed sets of recognized `step_name` values (spec §2, §4.1).
//!
//! Grounded on `original_source/rayvault/agent/protocol.py`'s `JOB_STEPS` /
//! `CONTROL_STEPS` sets. Job steps go through the worker queue and produce a
//! receipt; control steps are answered synchronously without enqueueing.

/// Steps that are enqueued and executed asynchronously by a worker.
pub const JOB_STEPS: &[&str] = &[
    "TTS_RENDER_CHUNKS",
    "AUDIO_POSTCHECK",
    "FFMPEG_PROBE",
    "FRAME_SAMPLING",
    "OPENCLAW_TASK",
];

/// Steps answered synchronously, without touching the job queue.
pub const CONTROL_STEPS: &[&str] = &["REGISTER_CAPS", "JOB_STATUS", "JOB_LOGS", "JOB_ARTIFACTS"];

/// `true` if `step_name` (already normalized) is in [`JOB_STEPS`].
#[must_use]
pub fn is_job_step(step_name: &str) -> bool {
    JOB_STEPS.contains(&step_name)
}

/// `true` if `step_name` (already normalized) is in [`CONTROL_STEPS`].
#[must_use]
pub fn is_control_step(step_name: &str) -> bool {
    CONTROL_STEPS.contains(&step_name)
}

/// `true` if `step_name` is recognized at all, job or control.
#[must_use]
pub fn is_supported_step(step_name: &str) -> bool {
    is_job_step(step_name) || is_control_step(step_name)
}

/// Normalize a `step_name` to the upper-case form the closed sets use.
///
/// Envelopes are rejected rather than silently coerced if this produces a
/// value outside [`JOB_STEPS`]/[`CONTROL_STEPS`]; normalization only undoes
/// incidental casing, it does not invent aliases (the original's
/// `LEGACY_JOB_TYPE_MAP` snake_case aliasing is deliberately not carried
/// over, per spec §9).
#[must_use]
pub fn normalize_step_name(step_name: &str) -> String {
    step_name.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_steps_and_control_steps_are_disjoint() {
        for step in JOB_STEPS {
            assert!(!CONTROL_STEPS.contains(step));
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_step_name(" ffmpeg_probe \n"), "FFMPEG_PROBE");
    }

    #[test]
    fn recognizes_known_steps() {
        assert!(is_job_step("TTS_RENDER_CHUNKS"));
        assert!(is_control_step("JOB_STATUS"));
        assert!(!is_supported_step("BOGUS_STEP"));
    }
}

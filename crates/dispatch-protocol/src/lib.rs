// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Envelope validation, HMAC signing, and fingerprint hashing (spec §4.1, §4.2).
//!
//! Grounded on `original_source/rayvault/agent/protocol.py`: canonical JSON
//! is `serde_json`'s default compact, key-sorted output (no `preserve_order`
//! feature enabled here, so `serde_json::Map` is a `BTreeMap` and needs no
//! extra sorting step), HMAC-SHA256 signs a five-field view of the envelope,
//! and verification is constant-time via `subtle`.

use dispatch_core::{normalize_step_name, DispatchError, ErrorCode};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Default allowed clock skew between envelope `timestamp` and now, in seconds.
pub const DEFAULT_SKEW_SECONDS: i64 = 300;

/// Minimum accepted length of a (lower-cased) `inputs_hash`.
pub const MIN_INPUTS_HASH_LEN: usize = 16;

/// A validated, authenticated request envelope (spec §3 "Envelope").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier for the run this job belongs to.
    pub run_id: String,
    /// Identifier for this specific job within the run.
    pub job_id: String,
    /// Normalized, upper-case step name.
    pub step_name: String,
    /// Lower-case content fingerprint of the job's inputs.
    pub inputs_hash: String,
    /// RFC 3339 timestamp the envelope was signed at.
    pub timestamp: String,
    /// HMAC-SHA256 auth token over the signing view, hex-encoded.
    #[serde(default)]
    pub auth_token: String,
}

/// Compute the canonical JSON form of a payload: compact, key-sorted.
///
/// Relies on `serde_json::Map` being a `BTreeMap` (the `preserve_order`
/// cargo feature is never enabled in this workspace), so ordinary
/// `serde_json::to_string` already produces sorted, whitespace-free output.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, DispatchError> {
    serde_json::to_string(value)
        .map_err(|e| DispatchError::new(ErrorCode::MalformedEnvelope, format!("cannot canonicalize payload: {e}")))
}

/// SHA-256 of the canonical JSON form of `payload`, as a stable fingerprint
/// for idempotent job identity (spec §4.2 "Fingerprint hasher").
pub fn compute_inputs_hash(payload: &serde_json::Value) -> Result<String, DispatchError> {
    let raw = canonical_json(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Select and normalize the five fields an auth token is computed over.
fn envelope_signing_view(
    run_id: &str,
    job_id: &str,
    step_name: &str,
    inputs_hash: &str,
    timestamp: &str,
) -> serde_json::Value {
    serde_json::json!({
        "run_id": run_id.trim(),
        "job_id": job_id.trim(),
        "step_name": normalize_step_name(step_name),
        "inputs_hash": inputs_hash.trim(),
        "timestamp": timestamp.trim(),
    })
}

/// Compute the HMAC-SHA256 auth token over an envelope's signing view.
pub fn compute_auth_token(
    secret: &str,
    run_id: &str,
    job_id: &str,
    step_name: &str,
    inputs_hash: &str,
    timestamp: &str,
) -> Result<String, DispatchError> {
    if secret.is_empty() {
        return Err(DispatchError::new(ErrorCode::MissingSecret, "missing shared secret for auth token"));
    }
    let view = envelope_signing_view(run_id, job_id, step_name, inputs_hash, timestamp);
    let raw = canonical_json(&view)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DispatchError::new(ErrorCode::MissingSecret, format!("invalid HMAC key: {e}")))?;
    mac.update(raw.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify `token` against the expected auth token, in constant time.
pub fn verify_auth_token(
    secret: &str,
    run_id: &str,
    job_id: &str,
    step_name: &str,
    inputs_hash: &str,
    timestamp: &str,
    token: &str,
) -> Result<bool, DispatchError> {
    let expected = compute_auth_token(secret, run_id, job_id, step_name, inputs_hash, timestamp)?;
    let got = token.trim().to_ascii_lowercase();
    if got.is_empty() {
        return Ok(false);
    }
    Ok(expected.to_ascii_lowercase().as_bytes().ct_eq(got.as_bytes()).into())
}

/// Parse an RFC 3339 / ISO-8601 timestamp, accepting a trailing `Z`.
pub fn parse_timestamp(ts: &str) -> Result<chrono::DateTime<chrono::Utc>, DispatchError> {
    let v = ts.trim();
    if v.is_empty() {
        return Err(DispatchError::new(ErrorCode::MalformedEnvelope, "timestamp is required"));
    }
    chrono::DateTime::parse_from_rfc3339(v)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| DispatchError::new(ErrorCode::MalformedEnvelope, format!("invalid timestamp {v:?}: {e}")))
}

/// Validate envelope shape, step_name, timestamp skew, and `inputs_hash`
/// length, without checking the auth token (spec §4.1 `validate()`).
pub fn validate_envelope(
    data: &serde_json::Value,
    allowed_steps: &[&str],
    skew_seconds: i64,
) -> Result<Envelope, DispatchError> {
    let get_str = |key: &str| -> String {
        data.get(key).and_then(|v| v.as_str()).unwrap_or("").trim().to_string()
    };

    let run_id = get_str("run_id");
    let job_id = get_str("job_id");
    let step_name_raw = get_str("step_name");
    let inputs_hash_raw = get_str("inputs_hash");
    let timestamp = get_str("timestamp");

    let mut missing = Vec::new();
    if run_id.is_empty() {
        missing.push("run_id");
    }
    if job_id.is_empty() {
        missing.push("job_id");
    }
    if step_name_raw.is_empty() {
        missing.push("step_name");
    }
    if inputs_hash_raw.is_empty() {
        missing.push("inputs_hash");
    }
    if timestamp.is_empty() {
        missing.push("timestamp");
    }
    if !missing.is_empty() {
        return Err(DispatchError::new(
            ErrorCode::MalformedEnvelope,
            format!("missing envelope fields: {}", missing.join(", ")),
        ));
    }

    let step = normalize_step_name(&step_name_raw);
    if !allowed_steps.contains(&step.as_str()) {
        return Err(DispatchError::new(
            ErrorCode::StepUnsupported,
            format!("unsupported step_name={step:?}"),
        ));
    }

    let ts = parse_timestamp(&timestamp)?;
    let now = chrono::Utc::now();
    let delta = (now - ts).num_milliseconds().abs() as f64 / 1000.0;
    if delta > skew_seconds as f64 {
        return Err(DispatchError::new(
            ErrorCode::TimestampSkew,
            format!("timestamp outside allowed skew ({delta:.0}s > {skew_seconds}s)"),
        ));
    }

    let inputs_hash = inputs_hash_raw.to_ascii_lowercase();
    if inputs_hash.len() < MIN_INPUTS_HASH_LEN {
        return Err(DispatchError::new(ErrorCode::InputsHashShort, "inputs_hash too short"));
    }

    let auth_token = data.get("auth_token").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();

    Ok(Envelope {
        run_id,
        job_id,
        step_name: step,
        inputs_hash,
        timestamp,
        auth_token,
    })
}

/// Validate an envelope and require its `auth_token` to verify against `secret`.
pub fn require_valid_auth(
    secret: &str,
    data: &serde_json::Value,
    allowed_steps: &[&str],
    skew_seconds: i64,
) -> Result<Envelope, DispatchError> {
    let env = validate_envelope(data, allowed_steps, skew_seconds)?;
    let ok = verify_auth_token(
        secret,
        &env.run_id,
        &env.job_id,
        &env.step_name,
        &env.inputs_hash,
        &env.timestamp,
        &env.auth_token,
    )?;
    if !ok {
        return Err(DispatchError::new(ErrorCode::AuthFailed, "auth_token invalid"));
    }
    Ok(env)
}

/// Build and sign a fresh envelope (controller-side helper, mirrors
/// `protocol.py::build_envelope`).
pub fn build_envelope(
    run_id: &str,
    job_id: &str,
    step_name: &str,
    inputs_hash: &str,
    secret: &str,
    timestamp: Option<&str>,
) -> Result<Envelope, DispatchError> {
    let step = normalize_step_name(step_name);
    let ts = timestamp.map(str::to_string).unwrap_or_else(dispatch_core::utc_now_iso);
    let auth_token = compute_auth_token(secret, run_id, job_id, &step, inputs_hash, &ts)?;
    Ok(Envelope {
        run_id: run_id.to_string(),
        job_id: job_id.to_string(),
        step_name: step,
        inputs_hash: inputs_hash.to_string(),
        timestamp: ts,
        auth_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::JOB_STEPS;

    fn all_steps() -> Vec<&'static str> {
        let mut steps: Vec<&'static str> = JOB_STEPS.to_vec();
        steps.extend_from_slice(dispatch_core::CONTROL_STEPS);
        steps
    }

    #[test]
    fn canonical_json_sorts_keys_and_is_compact() {
        let v = serde_json::json!({"b": 1, "a": 2});
        let s = canonical_json(&v).unwrap();
        assert_eq!(s, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn inputs_hash_is_deterministic() {
        let payload = serde_json::json!({"x": 1, "y": [1, 2, 3]});
        let h1 = compute_inputs_hash(&payload).unwrap();
        let h2 = compute_inputs_hash(&payload).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let token = compute_auth_token("s3cret", "run1", "job1", "ffmpeg_probe", &"a".repeat(16), "2026-01-01T00:00:00Z").unwrap();
        let ok = verify_auth_token("s3cret", "run1", "job1", "ffmpeg_probe", &"a".repeat(16), "2026-01-01T00:00:00Z", &token).unwrap();
        assert!(ok);
    }

    #[test]
    fn tampered_field_fails_verification() {
        let token = compute_auth_token("s3cret", "run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), "2026-01-01T00:00:00Z").unwrap();
        let ok = verify_auth_token("s3cret", "run1", "job2", "FFMPEG_PROBE", &"a".repeat(16), "2026-01-01T00:00:00Z", &token).unwrap();
        assert!(!ok);
    }

    #[test]
    fn validate_rejects_unsupported_step() {
        let now = dispatch_core::utc_now_iso();
        let data = serde_json::json!({
            "run_id": "r", "job_id": "j", "step_name": "NOT_A_STEP",
            "inputs_hash": "a".repeat(16), "timestamp": now,
        });
        let err = validate_envelope(&data, &all_steps(), DEFAULT_SKEW_SECONDS).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StepUnsupported);
    }

    #[test]
    fn validate_rejects_short_inputs_hash() {
        let now = dispatch_core::utc_now_iso();
        let data = serde_json::json!({
            "run_id": "r", "job_id": "j", "step_name": "FFMPEG_PROBE",
            "inputs_hash": "short", "timestamp": now,
        });
        let err = validate_envelope(&data, &all_steps(), DEFAULT_SKEW_SECONDS).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InputsHashShort);
    }

    #[test]
    fn validate_rejects_skewed_timestamp() {
        let data = serde_json::json!({
            "run_id": "r", "job_id": "j", "step_name": "FFMPEG_PROBE",
            "inputs_hash": "a".repeat(16), "timestamp": "2000-01-01T00:00:00Z",
        });
        let err = validate_envelope(&data, &all_steps(), DEFAULT_SKEW_SECONDS).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimestampSkew);
    }

    #[test]
    fn require_valid_auth_rejects_bad_token() {
        let now = dispatch_core::utc_now_iso();
        let data = serde_json::json!({
            "run_id": "r", "job_id": "j", "step_name": "FFMPEG_PROBE",
            "inputs_hash": "a".repeat(16), "timestamp": now, "auth_token": "deadbeef",
        });
        let err = require_valid_auth("s3cret", &data, &all_steps(), DEFAULT_SKEW_SECONDS).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthFailed);
    }

    #[test]
    fn build_envelope_produces_verifiable_token() {
        let env = build_envelope("r", "j", "ffmpeg_probe", &"b".repeat(16), "s3cret", None).unwrap();
        assert_eq!(env.step_name, "FFMPEG_PROBE");
        let ok = verify_auth_token("s3cret", &env.run_id, &env.job_id, &env.step_name, &env.inputs_hash, &env.timestamp, &env.auth_token).unwrap();
        assert!(ok);
    }
}

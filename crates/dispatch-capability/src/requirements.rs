//! Pure requirement matching over a capability report (spec §4.4 table).
//!
//! Grounded on `original_source/rayvault/agent/controller.py::_worker_meets_requirements`,
//! generalized to the recognized key set the spec names.

use dispatch_core::{CapabilityReport, Requirements};

/// Check `caps` against `requirements`.
///
/// Returns `(true, "")` on a match, or `(false, reason)` where `reason` is a
/// short machine-readable tag naming the first requirement that failed
/// (spec §4.4: `"os=..., min_ram_gb=..."`).
#[must_use]
pub fn meets_requirements(caps: &CapabilityReport, requirements: &Requirements) -> (bool, String) {
    if !requirements.os_in.is_empty() {
        let caps_os = caps.get("os").and_then(|v| v.as_str()).unwrap_or("").to_ascii_lowercase();
        let allowed = requirements.os_in.iter().any(|os| os.to_ascii_lowercase() == caps_os);
        if !allowed {
            return (false, format!("os={caps_os}"));
        }
    }

    if let Some(min_ram) = requirements.min_ram_gb {
        let ram = caps.get("ram_gb").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
        if ram < min_ram {
            return (false, format!("min_ram_gb={min_ram}"));
        }
    }

    if let Some(min_vram) = requirements.min_vram_gb {
        let vram = caps.get("vram_gb").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
        if vram < min_vram {
            return (false, format!("min_vram_gb={min_vram}"));
        }
    }

    if requirements.gpu_required {
        let gpu = caps.get("gpu").and_then(serde_json::Value::as_bool).unwrap_or(false);
        if !gpu {
            return (false, "gpu_required=true".to_string());
        }
    }

    if requirements.davinci_available {
        let davinci = caps.get("davinci_available").and_then(serde_json::Value::as_bool).unwrap_or(false);
        if !davinci {
            return (false, "davinci_available=true".to_string());
        }
    }

    (true, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(entries: &[(&str, serde_json::Value)]) -> CapabilityReport {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_requirements_always_match() {
        let c = caps(&[]);
        let (ok, reason) = meets_requirements(&c, &Requirements::default());
        assert!(ok);
        assert!(reason.is_empty());
    }

    #[test]
    fn os_mismatch_is_reported() {
        let c = caps(&[("os", serde_json::json!("linux"))]);
        let reqs = Requirements {
            os_in: vec!["windows".into(), "darwin".into()],
            ..Default::default()
        };
        let (ok, reason) = meets_requirements(&c, &reqs);
        assert!(!ok);
        assert_eq!(reason, "os=linux");
    }

    #[test]
    fn ram_threshold_is_inclusive() {
        let c = caps(&[("ram_gb", serde_json::json!(16.0))]);
        let reqs = Requirements {
            min_ram_gb: Some(16.0),
            ..Default::default()
        };
        assert!(meets_requirements(&c, &reqs).0);
    }

    #[test]
    fn gpu_required_fails_without_gpu() {
        let c = caps(&[("gpu", serde_json::json!(false))]);
        let reqs = Requirements {
            gpu_required: true,
            ..Default::default()
        };
        let (ok, reason) = meets_requirements(&c, &reqs);
        assert!(!ok);
        assert_eq!(reason, "gpu_required=true");
    }

    #[test]
    fn davinci_requirement_checks_flag() {
        let c = caps(&[("davinci_available", serde_json::json!(true))]);
        let reqs = Requirements {
            davinci_available: true,
            ..Default::default()
        };
        assert!(meets_requirements(&c, &reqs).0);
    }
}

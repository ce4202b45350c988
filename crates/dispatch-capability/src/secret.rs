//! Shared-secret resolution (spec §6, generalized from `controller.py`'s
//! `RAYVAULT_*` env-var chain without carrying over its fixed names).

use dispatch_core::{DispatchError, ErrorCode};

/// Resolve a node's HMAC shared secret.
///
/// Resolution order: an explicit CLI-provided value, then the node's
/// configured `secret_env` variable, then `current_env` (a conventional
/// "current" secret, consulted during a secret rotation window), then
/// `fallback_env`. The first non-empty value wins; `MISSING_SECRET` if none
/// are set.
pub fn resolve_secret(
    cli_value: Option<&str>,
    secret_env: Option<&str>,
    current_env: &str,
    fallback_env: &str,
) -> Result<String, DispatchError> {
    if let Some(v) = cli_value {
        let v = v.trim();
        if !v.is_empty() {
            return Ok(v.to_string());
        }
    }

    if let Some(name) = secret_env {
        if let Ok(v) = std::env::var(name) {
            let v = v.trim();
            if !v.is_empty() {
                return Ok(v.to_string());
            }
        }
    }

    if let Ok(v) = std::env::var(current_env) {
        let v = v.trim();
        if !v.is_empty() {
            return Ok(v.to_string());
        }
    }

    if let Ok(v) = std::env::var(fallback_env) {
        let v = v.trim();
        if !v.is_empty() {
            return Ok(v.to_string());
        }
    }

    Err(DispatchError::new(
        ErrorCode::MissingSecret,
        format!("missing cluster secret: set --secret, {secret_env:?}, {current_env}, or {fallback_env}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_value_wins_over_everything() {
        let got =
            resolve_secret(Some("cli-secret"), Some("SOME_VAR_NOT_SET"), "ALSO_NOT_SET", "STILL_NOT_SET").unwrap();
        assert_eq!(got, "cli-secret");
    }

    #[test]
    fn current_env_wins_over_default_env() {
        std::env::set_var("DISPATCH_TEST_CURRENT_A", "current-secret");
        let got = resolve_secret(None, Some("DISPATCH_TEST_UNSET_SECRET_A"), "DISPATCH_TEST_CURRENT_A", "DISPATCH_TEST_DEFAULT_A").unwrap();
        std::env::remove_var("DISPATCH_TEST_CURRENT_A");
        assert_eq!(got, "current-secret");
    }

    #[test]
    fn missing_everywhere_is_an_error() {
        let err = resolve_secret(
            None,
            Some("DISPATCH_TEST_UNSET_B"),
            "DISPATCH_TEST_UNSET_CURRENT_B",
            "DISPATCH_TEST_UNSET_DEFAULT_B",
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingSecret);
    }
}

//! Sandboxed output-directory resolution (spec §8 property 6).
//!
//! Grounded on `original_source/rayvault/agent/jobs.py::_safe_output_dir`:
//! the caller-supplied `output_dir` is joined onto the workspace root,
//! canonicalized, and rejected unless the result stays inside the root.

use dispatch_core::{DispatchError, ErrorCode};
use std::path::{Path, PathBuf};

/// Resolve `payload["output_dir"]` (or `default_rel` if absent) against
/// `workspace_root`, creating the directory, and reject any path that
/// escapes the workspace root via `..` or a symlink.
pub fn safe_output_dir(
    workspace_root: &Path,
    requested: Option<&str>,
    default_rel: &str,
) -> Result<PathBuf, DispatchError> {
    let rel = requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_rel);
    let rel = rel.trim_start_matches('/');

    let workspace_real = workspace_root.canonicalize().map_err(|e| {
        DispatchError::new(ErrorCode::InvalidOutputDir, format!("workspace root {workspace_root:?} not usable: {e}"))
    })?;

    let candidate = workspace_real.join(rel);
    std::fs::create_dir_all(&candidate).map_err(|e| {
        DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot create output dir {candidate:?}: {e}"))
    })?;
    let resolved = candidate.canonicalize().map_err(|e| {
        DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot resolve output dir {candidate:?}: {e}"))
    })?;

    if resolved != workspace_real && !resolved.starts_with(&workspace_real) {
        return Err(DispatchError::new(
            ErrorCode::PathEscape,
            format!("output dir escapes workspace: {resolved:?}"),
        ));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_output_dir_given() {
        let tmp = tempfile::tempdir().unwrap();
        let out = safe_output_dir(tmp.path(), None, "artifacts/job1/probe").unwrap();
        assert!(out.ends_with("artifacts/job1/probe"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = safe_output_dir(tmp.path(), Some("../../etc"), "artifacts").unwrap_err();
        assert_eq!(err.code(), dispatch_core::ErrorCode::PathEscape);
    }

    #[test]
    fn accepts_nested_relative_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let out = safe_output_dir(tmp.path(), Some("artifacts/job2/frames"), "artifacts").unwrap();
        assert!(out.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn strips_leading_slash_instead_of_treating_as_absolute() {
        let tmp = tempfile::tempdir().unwrap();
        let out = safe_output_dir(tmp.path(), Some("/artifacts/job3"), "artifacts").unwrap();
        assert!(out.starts_with(tmp.path().canonicalize().unwrap()));
    }
}

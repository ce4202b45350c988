//! Write-then-rename durability primitive (spec §8 property 7 "Atomic writes").
//!
//! Grounded on `original_source`'s `atomic_write_json` (used throughout
//! `worker_server.py` and `controller.py` for every receipt write): write
//! the full payload to a sibling `.tmp` file, `fsync` it, then `rename` it
//! into place. `rename` within a directory is atomic on the filesystems
//! this targets, so a crash mid-write never leaves a partial receipt.

use dispatch_core::{DispatchError, ErrorCode};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Atomically write `bytes` to `path`, creating parent directories as needed.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), DispatchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DispatchError::new(ErrorCode::InvalidOutputDir, format!("cannot create {parent:?}: {e}")))?;
    }

    let tmp_path = tmp_sibling(path);
    {
        let mut f = File::create(&tmp_path)
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot create {tmp_path:?}: {e}")))?;
        f.write_all(bytes)
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot write {tmp_path:?}: {e}")))?;
        f.sync_all()
            .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot fsync {tmp_path:?}: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot rename {tmp_path:?} to {path:?}: {e}")))?;
    Ok(())
}

/// Atomically write `value` to `path` as pretty JSON.
pub fn atomic_write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), DispatchError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| DispatchError::new(ErrorCode::CommandFailed, format!("cannot serialize {path:?}: {e}")))?;
    atomic_write_bytes(path, &bytes)
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("out");
    path.with_file_name(format!(".{file_name}.tmp"))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Atomic receipt and local-cache persistence (spec §4.3, §4.10).

mod atomic;
mod cache;
mod store;

pub use atomic::{atomic_write_bytes, atomic_write_json};
pub use cache::LocalCache;
pub use store::ReceiptStore;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `true` if `bytes` hashes to `expected_hex` (case-insensitive).
///
/// Used to detect the mismatch spec §9 Open Question 3 resolves: a
/// downloaded artifact whose hash disagrees with what the worker reported
/// is recorded in `Receipt::artifact_mismatches` and the job is marked
/// failed with `ARTIFACT_HASH_MISMATCH`.
#[must_use]
pub fn verify_artifact_sha256(bytes: &[u8], expected_hex: &str) -> bool {
    sha256_hex(bytes).eq_ignore_ascii_case(expected_hex.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_artifact_sha256_detects_mismatch() {
        let hash = sha256_hex(b"hello");
        assert!(verify_artifact_sha256(b"hello", &hash));
        assert!(!verify_artifact_sha256(b"goodbye", &hash));
    }
}

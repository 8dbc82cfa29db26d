//! Content fingerprints for serialized state blobs.
//!
//! The primary checksum is a lowercase hex SHA-256 digest. When the digest
//! provider fails the checksum falls back to a 32-bit rolling hash rendered as
//! `fb_` followed by eight hex digits, so callers always get a value.
//!
//! Checksums mark integrity only. They are never used for access control.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix marking a fallback (non-cryptographic) checksum.
pub const FALLBACK_PREFIX: &str = "fb_";

/// Failure of a digest provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("digest unavailable: {0}")]
pub struct DigestError(pub String);

/// Something that can produce a hex digest of a byte slice.
pub trait DigestProvider {
    fn hex_digest(&self, data: &[u8]) -> Result<String, DigestError>;
}

/// SHA-256 digest provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl DigestProvider for Sha256Digest {
    fn hex_digest(&self, data: &[u8]) -> Result<String, DigestError> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Checksum `data` with SHA-256, falling back to the rolling hash.
pub fn checksum(data: &[u8]) -> String {
    checksum_with(&Sha256Digest, data)
}

/// Checksum `data` with an explicit provider. Never fails.
pub fn checksum_with<D: DigestProvider + ?Sized>(provider: &D, data: &[u8]) -> String {
    match provider.hex_digest(data) {
        Ok(digest) => digest,
        Err(err) => {
            tracing::warn!(error = %err, "digest failed, using fallback checksum");
            fallback_checksum(data)
        }
    }
}

/// Deterministic 32-bit rolling hash (`h = h * 31 + byte`).
pub fn fallback_checksum(data: &[u8]) -> String {
    let hash = data
        .iter()
        .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    format!("{}{:08x}", FALLBACK_PREFIX, hash)
}

/// Whether `checksum` was produced by the fallback path.
pub fn is_fallback(checksum: &str) -> bool {
    checksum.starts_with(FALLBACK_PREFIX)
}

/// Recompute with the algorithm `expected` came from and compare.
pub fn verify(data: &[u8], expected: &str) -> bool {
    let actual = if is_fallback(expected) {
        fallback_checksum(data)
    } else {
        checksum(data)
    };
    actual == expected
}

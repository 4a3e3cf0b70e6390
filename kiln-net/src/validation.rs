// kiln-net/src/validation.rs
use std::fs::File;
use std::io;
use std::path::Path;

use kiln_common::error::{KilnError, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Lowercase hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes_copied = io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    tracing::debug!(
        "Calculated SHA256 of {}: {} ({} bytes read)",
        path.display(),
        actual,
        bytes_copied
    );
    Ok(actual)
}

/// Fails with `ChecksumMismatch` naming `artifact` when the digest of the file
/// at `path` differs from `expected`.
pub fn verify_checksum(path: &Path, expected: &str, artifact: &str) -> Result<()> {
    tracing::debug!("Verifying checksum for: {}", path.display());
    let actual = file_sha256(path)?;
    tracing::debug!("Expected SHA256:   {}", expected);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(KilnError::ChecksumMismatch {
            artifact: artifact.to_string(),
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}

/// Only `https` and `file` URLs are fetched.
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| KilnError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" | "file" => Ok(url),
        other => Err(KilnError::ValidationError(format!(
            "Invalid URL scheme for '{url_str}': Must be https or file, but got '{other}'"
        ))),
    }
}

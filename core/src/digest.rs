//! SHA256 content digests in `sha256:<hex>` form.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{BundleError, Result};

/// Prefix used for every digest produced by this crate.
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute the prefixed SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize()))
}

/// Read a stream to the end, returning its bytes and prefixed digest.
pub fn read_all_with_digest(reader: &mut dyn Read) -> std::io::Result<(Vec<u8>, String)> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    let digest = sha256_bytes(&data);
    Ok((data, digest))
}

/// Digest a stream without buffering it.
pub fn sha256_reader(reader: &mut dyn Read) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((
        format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize())),
        total,
    ))
}

/// Compute the prefixed SHA256 digest of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        BundleError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to open {} for hashing: {}", path.display(), e),
        ))
    })?;
    let (digest, _) = sha256_reader(&mut file)?;
    Ok(digest)
}

/// Fail with an integrity error unless `actual` equals `expected`.
pub fn verify_digest(locator: &str, expected: &str, actual: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BundleError::DigestMismatch {
            locator: locator.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Hex part of a prefixed digest.
pub fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix(SHA256_PREFIX).unwrap_or(digest)
}

/// Hex part of a well-formed `sha256:<64 lowercase hex>` digest.
pub fn parse_sha256(digest: &str) -> Option<&str> {
    digest
        .strip_prefix(SHA256_PREFIX)
        .filter(|hex| hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')))
}

//! Cache key construction.
//!
//! Keys have the form `kind:fingerprint:options`, where the fingerprint is
//! a truncated SHA-256 of the input content and the options are the
//! serialized view parameters. Equal inputs always produce equal keys.

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::CacheError;

/// Number of digest bytes kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 12;

/// Hex fingerprint of `content`.
#[must_use]
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Builds a cache key for a derived view.
///
/// # Errors
///
/// Returns [`CacheError::Json`] if `options` cannot be serialized.
pub fn cache_key<O: Serialize + ?Sized>(
    kind: &str,
    content: &[u8],
    options: &O,
) -> Result<String, CacheError> {
    Ok(format!(
        "{kind}:{}:{}",
        fingerprint(content),
        serde_json::to_string(options)?
    ))
}

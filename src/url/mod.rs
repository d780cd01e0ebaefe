//! URL handling module for Batch-Harvest
//!
//! This module validates submitted URLs and derives the stable hash used for
//! fast existence checks and duplicate detection within a batch.

mod normalize;

use crate::UrlResult;
use sha2::{Digest, Sha256};
use url::Url;

pub use normalize::{canonical_form, parse_target_url};

/// Computes the SHA-256 hash (hex) of a URL's canonical form
///
/// # Examples
///
/// ```
/// use batch_harvest::url::{parse_target_url, url_hash};
///
/// let a = url_hash(&parse_target_url("https://www.example.com/a/").unwrap()).unwrap();
/// let b = url_hash(&parse_target_url("https://example.com/a").unwrap()).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn url_hash(url: &Url) -> UrlResult<String> {
    let canonical = canonical_form(url)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes a raw URL string, validating it first
pub fn hash_url_str(url_str: &str) -> UrlResult<String> {
    url_hash(&parse_target_url(url_str)?)
}

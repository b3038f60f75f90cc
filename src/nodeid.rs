//! Stable node identifiers.
//!
//! A stable id is a 12 character token drawn from the URL-safe alphabet `A-Za-z0-9_-`. It is
//! written into a document's front matter the first time the document is synchronized and never
//! changes afterwards. Uniqueness is not guaranteed here: the sync engine detects collisions when
//! it writes to the cache.

use crate::error::RouxError;

pub const NODE_ID_LEN: usize = 12;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

pub fn is_valid_id(candidate: &str) -> bool {
    candidate.len() == NODE_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Generate a fresh random token. The alphabet has exactly 64 symbols so masking a random byte
/// to its low 6 bits is uniform.
pub fn generate_id() -> Result<String, RouxError> {
    let mut bytes = [0u8; NODE_ID_LEN];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| RouxError::Io(format!("random source unavailable: {e}")))?;
    Ok(bytes
        .iter()
        .map(|b| ALPHABET[(b & 0x3f) as usize] as char)
        .collect())
}

//! SHA-256 helpers

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest
pub const SHA256_LENGTH: usize = 32;

/// SHA-256 of arbitrary data
pub fn sha256(data: &[u8]) -> [u8; SHA256_LENGTH] {
    Sha256::digest(data).into()
}

/// SHA-256 over several slices, as if they were concatenated
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; SHA256_LENGTH] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Relying-party id hash as embedded in authenticator data
///
/// ```
/// use fido_client_crypto::rp_id_hash;
///
/// let hash = rp_id_hash("example.com");
/// assert_eq!(hash[0], 0xa3);
/// ```
pub fn rp_id_hash(rp_id: &str) -> [u8; SHA256_LENGTH] {
    sha256(rp_id.as_bytes())
}

//! P-256 ECDSA (ES256) key pairs for the platform authenticator
//!
//! COSE algorithm identifier: -7 (ES256)
//!
//! Public keys travel as SEC1 points: 65 bytes uncompressed (`0x04 || x || y`)
//! in authenticator data and U2F responses, 33 bytes compressed in the hybrid
//! QR handshake. Signatures are DER encoded, as WebAuthn expects.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::{CryptoError, Result};

use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Length of an uncompressed SEC1 P-256 point
pub const UNCOMPRESSED_POINT_LENGTH: usize = 65;

/// Length of a compressed SEC1 P-256 point
pub const COMPRESSED_POINT_LENGTH: usize = 33;

/// An ES256 key pair
///
/// The private scalar is wiped from memory when the pair is dropped.
#[derive(Clone)]
pub struct KeyPair {
    private_key: Zeroizing<[u8; 32]>,
    public_key: [u8; UNCOMPRESSED_POINT_LENGTH],
}

impl KeyPair {
    /// Generate a fresh random key pair
    ///
    /// ```
    /// use fido_client_crypto::KeyPair;
    ///
    /// let pair = KeyPair::generate();
    /// assert_eq!(pair.public_key()[0], 0x04);
    /// ```
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Restore a key pair from its 32-byte private scalar
    pub fn from_private_key(private_key: &[u8; 32]) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(private_key.into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(&signing_key))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        let mut public_key = [0u8; UNCOMPRESSED_POINT_LENGTH];
        public_key.copy_from_slice(signing_key.verifying_key().to_encoded_point(false).as_bytes());

        Self {
            private_key: Zeroizing::new(signing_key.to_bytes().into()),
            public_key,
        }
    }

    /// Uncompressed SEC1 public key (`0x04 || x || y`)
    pub fn public_key(&self) -> &[u8; UNCOMPRESSED_POINT_LENGTH] {
        &self.public_key
    }

    /// The private scalar
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// Sign `data` (hashed with SHA-256 internally), returning a DER signature
    ///
    /// ```
    /// use fido_client_crypto::{KeyPair, ecdsa};
    ///
    /// let pair = KeyPair::generate();
    /// let signature = pair.sign(b"authData || clientDataHash").unwrap();
    /// assert!(ecdsa::verify(pair.public_key(), b"authData || clientDataHash", &signature).is_ok());
    /// ```
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signing_key = SigningKey::from_bytes((&*self.private_key).into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let signature: Signature = signing_key.sign(data);
        Ok(signature.to_der().to_bytes().to_vec())
    }
}

impl core::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Verify a DER-encoded ES256 signature against a SEC1 public key
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;

    verifying_key
        .verify(data, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Split an uncompressed SEC1 point into its affine coordinates
///
/// The point is checked to lie on the curve.
pub fn public_key_coordinates(public_key: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    if public_key.len() != UNCOMPRESSED_POINT_LENGTH || public_key[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey);
    }
    VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;

    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(&public_key[1..33]);
    y.copy_from_slice(&public_key[33..65]);
    Ok((x, y))
}

/// Compress a SEC1 point to 33 bytes (`0x02/0x03 || x`)
pub fn compress_public_key(public_key: &[u8]) -> Result<[u8; COMPRESSED_POINT_LENGTH]> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;

    let mut out = [0u8; COMPRESSED_POINT_LENGTH];
    out.copy_from_slice(verifying_key.to_encoded_point(true).as_bytes());
    Ok(out)
}

/// Expand a compressed SEC1 point to its uncompressed form
pub fn decompress_public_key(compressed: &[u8]) -> Result<[u8; UNCOMPRESSED_POINT_LENGTH]> {
    if compressed.len() != COMPRESSED_POINT_LENGTH {
        return Err(CryptoError::InvalidLength {
            expected: COMPRESSED_POINT_LENGTH,
            actual: compressed.len(),
        });
    }
    let verifying_key =
        VerifyingKey::from_sec1_bytes(compressed).map_err(|_| CryptoError::InvalidPublicKey)?;

    let mut out = [0u8; UNCOMPRESSED_POINT_LENGTH];
    out.copy_from_slice(verifying_key.to_encoded_point(false).as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct_keys() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        assert_eq!(a.public_key()[0], 0x04);
        assert_ne!(a.public_key(), b.public_key());
        assert_ne!(a.private_key(), &[0u8; 32]);
    }

    #[test]
    fn test_from_private_key_is_deterministic() {
        let pair = KeyPair::generate();
        let restored = KeyPair::from_private_key(pair.private_key()).unwrap();

        assert_eq!(pair.public_key(), restored.public_key());
    }

    #[test]
    fn test_invalid_private_key() {
        assert_eq!(
            KeyPair::from_private_key(&[0u8; 32]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::generate();
        let signature = pair.sign(b"Hello, FIDO2!").unwrap();

        assert!(signature.len() >= 68 && signature.len() <= 73);
        assert!(verify(pair.public_key(), b"Hello, FIDO2!", &signature).is_ok());
        assert!(verify(pair.public_key(), b"Wrong message", &signature).is_err());
    }

    #[test]
    fn test_verify_wrong_key() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();
        let signature = pair.sign(b"data").unwrap();

        assert_eq!(
            verify(other.public_key(), b"data", &signature).unwrap_err(),
            CryptoError::InvalidSignature
        );
    }

    #[test]
    fn test_coordinates() {
        let pair = KeyPair::generate();
        let (x, y) = public_key_coordinates(pair.public_key()).unwrap();

        assert_eq!(&pair.public_key()[1..33], &x);
        assert_eq!(&pair.public_key()[33..], &y);
    }

    #[test]
    fn test_coordinates_rejects_compressed() {
        let pair = KeyPair::generate();
        let compressed = compress_public_key(pair.public_key()).unwrap();

        assert!(public_key_coordinates(&compressed).is_err());
    }

    #[test]
    fn test_compress_decompress() {
        let pair = KeyPair::generate();
        let compressed = compress_public_key(pair.public_key()).unwrap();

        assert!(compressed[0] == 0x02 || compressed[0] == 0x03);
        assert_eq!(&compressed[1..], &pair.public_key()[1..33]);
        assert_eq!(&decompress_public_key(&compressed).unwrap(), pair.public_key());
    }

    #[test]
    fn test_decompress_wrong_length() {
        assert_eq!(
            decompress_public_key(&[0x02; 10]).unwrap_err(),
            CryptoError::InvalidLength {
                expected: 33,
                actual: 10
            }
        );
    }
}

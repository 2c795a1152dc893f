//! Credential ids of the platform authenticator
//!
//! Layout: `type(1) || key handle(32) || SHA-256(rpId || public key)(32)`.
//! The trailing hash binds the id to one relying party and one key.

use fido_client_crypto::hash::sha256_concat;

use crate::error::{Error, Result};

/// The only credential id type
pub const CREDENTIAL_TYPE: u8 = 1;

pub const KEY_HANDLE_LENGTH: usize = 32;

/// Encoded length of a credential id
pub const CREDENTIAL_ID_LENGTH: usize = 1 + KEY_HANDLE_LENGTH + 32;

/// Opaque handle naming a key in the credential store
pub type KeyHandle = [u8; KEY_HANDLE_LENGTH];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialId {
    pub key_handle: KeyHandle,
    pub rp_id: String,
    /// Uncompressed SEC1 public key
    pub public_key: [u8; 65],
}

impl CredentialId {
    pub fn new(key_handle: KeyHandle, rp_id: impl Into<String>, public_key: [u8; 65]) -> Self {
        Self {
            key_handle,
            rp_id: rp_id.into(),
            public_key,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let binding = sha256_concat(&[self.rp_id.as_bytes(), self.public_key.as_slice()]);

        let mut out = Vec::with_capacity(CREDENTIAL_ID_LENGTH);
        out.push(CREDENTIAL_TYPE);
        out.extend_from_slice(&self.key_handle);
        out.extend_from_slice(&binding);
        out
    }

    /// Key handle of an encoded id, without checking the binding hash
    pub fn decode_key_handle(data: &[u8]) -> Result<KeyHandle> {
        if data.len() != CREDENTIAL_ID_LENGTH {
            return Err(Error::Data);
        }
        if data[0] != CREDENTIAL_TYPE {
            return Err(Error::Data);
        }

        let mut key_handle = [0u8; KEY_HANDLE_LENGTH];
        key_handle.copy_from_slice(&data[1..1 + KEY_HANDLE_LENGTH]);
        Ok(key_handle)
    }

    /// Whether `data` is exactly this credential's encoded id
    pub fn matches(&self, data: &[u8]) -> bool {
        self.encode() == data
    }
}

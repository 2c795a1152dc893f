//! Key storage for the platform authenticator
//!
//! [`CredentialStore`] is the boundary to the platform key store. Keys are
//! addressed by relying party and key handle; signing goes through a
//! [`SignatureHandle`] that the user prompt unlocks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use fido_client_crypto::KeyPair;
use fido_client_ctap::User;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::screenlock::credential::{CredentialId, KeyHandle};

/// A credential held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub id: CredentialId,
    pub user: Option<User>,
}

/// Signing capability for one stored key
pub struct SignatureHandle {
    credential: CredentialId,
    key: KeyPair,
}

impl SignatureHandle {
    pub fn new(credential: CredentialId, key: KeyPair) -> Self {
        Self { credential, key }
    }

    pub fn credential(&self) -> &CredentialId {
        &self.credential
    }

    /// ES256 signature over `data`, DER encoded
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(data)?)
    }
}

impl fmt::Debug for SignatureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureHandle")
            .field("rp_id", &self.credential.rp_id)
            .finish_non_exhaustive()
    }
}

/// Platform key store
pub trait CredentialStore: Send + Sync {
    /// Generate a P-256 key under a fresh key handle
    fn create_key(&self, rp_id: &str, user: Option<&User>) -> Result<CredentialId>;

    fn get(&self, rp_id: &str, key_handle: &KeyHandle) -> Option<StoredCredential>;

    /// Every credential of `rp_id`
    fn list(&self, rp_id: &str) -> Vec<StoredCredential>;

    fn signature_handle(&self, rp_id: &str, key_handle: &KeyHandle) -> Result<SignatureHandle>;

    /// Remove a key; returns whether it existed
    fn delete(&self, rp_id: &str, key_handle: &KeyHandle) -> bool;

    fn contains(&self, rp_id: &str, key_handle: &KeyHandle) -> bool {
        self.get(rp_id, key_handle).is_some()
    }
}

struct Entry {
    key: KeyPair,
    user: Option<User>,
}

/// In-memory [`CredentialStore`]; keys live as long as the store
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<BTreeMap<(String, KeyHandle), Entry>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stored(rp_id: &str, key_handle: &KeyHandle, entry: &Entry) -> StoredCredential {
        StoredCredential {
            id: CredentialId::new(*key_handle, rp_id, *entry.key.public_key()),
            user: entry.user.clone(),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn create_key(&self, rp_id: &str, user: Option<&User>) -> Result<CredentialId> {
        let mut entries = self.entries.lock().map_err(|_| Error::InvalidState)?;

        let mut key_handle = [0u8; 32];
        loop {
            rand::thread_rng().fill_bytes(&mut key_handle);
            if !entries.contains_key(&(rp_id.to_string(), key_handle)) {
                break;
            }
        }

        let key = KeyPair::generate();
        let id = CredentialId::new(key_handle, rp_id, *key.public_key());
        entries.insert(
            (rp_id.to_string(), key_handle),
            Entry {
                key,
                user: user.cloned(),
            },
        );

        tracing::debug!(rp_id, "Platform key created");
        Ok(id)
    }

    fn get(&self, rp_id: &str, key_handle: &KeyHandle) -> Option<StoredCredential> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&(rp_id.to_string(), *key_handle))
            .map(|entry| Self::stored(rp_id, key_handle, entry))
    }

    fn list(&self, rp_id: &str) -> Vec<StoredCredential> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|((rp, _), _)| rp == rp_id)
            .map(|((_, key_handle), entry)| Self::stored(rp_id, key_handle, entry))
            .collect()
    }

    fn signature_handle(&self, rp_id: &str, key_handle: &KeyHandle) -> Result<SignatureHandle> {
        let entries = self.entries.lock().map_err(|_| Error::InvalidState)?;
        let entry = entries
            .get(&(rp_id.to_string(), *key_handle))
            .ok_or(Error::InvalidState)?;

        Ok(SignatureHandle::new(
            CredentialId::new(*key_handle, rp_id, *entry.key.public_key()),
            entry.key.clone(),
        ))
    }

    fn delete(&self, rp_id: &str, key_handle: &KeyHandle) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        let removed = entries.remove(&(rp_id.to_string(), *key_handle)).is_some();
        if removed {
            tracing::debug!(rp_id, "Platform key deleted");
        }
        removed
    }
}

//! Hybrid (caBLE v2) ephemeral identifier sealing
//!
//! A hybrid authenticator advertises a 20-byte EID over BLE:
//!
//! ```text
//! EID = AES-256(key[..32], plaintext) || HMAC-SHA256(key[32..], ciphertext)[..4]
//! ```
//!
//! The 64-byte EID key is derived with HKDF-SHA256 from the 16-byte secret
//! exchanged through the QR code. Only the holder of that secret can tell
//! which advert belongs to the session.
//!
//! Plaintext layout (16 bytes): a zero byte, a 10-byte nonce, a 3-byte
//! routing id and a little-endian 2-byte tunnel server id.

use crate::error::{CryptoError, Result};

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of a BLE advertised EID
pub const EID_LENGTH: usize = 20;

/// Length of the derived EID key (AES key followed by HMAC key)
pub const EID_KEY_LENGTH: usize = 64;

/// Length of the QR code secret
pub const SECRET_LENGTH: usize = 16;

/// Length of the EID plaintext (one AES block)
pub const PLAINTEXT_LENGTH: usize = 16;

const TAG_LENGTH: usize = EID_LENGTH - PLAINTEXT_LENGTH;

/// EID key material, wiped on drop
pub type EidKey = Zeroizing<[u8; EID_KEY_LENGTH]>;

/// HKDF purposes used by the hybrid protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeyPurpose {
    EidKey = 1,
    TunnelId = 2,
    Psk = 3,
}

impl KeyPurpose {
    fn info(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }
}

/// Derive key material for `purpose` from the QR secret
pub fn derive(secret: &[u8], purpose: KeyPurpose, out: &mut [u8]) -> Result<()> {
    Hkdf::<Sha256>::new(None, secret)
        .expand(&purpose.info(), out)
        .map_err(|_| CryptoError::KeyDerivationFailed)
}

/// Derive the 64-byte EID key from the QR secret
pub fn derive_eid_key(secret: &[u8]) -> Result<EidKey> {
    let mut key = Zeroizing::new([0u8; EID_KEY_LENGTH]);
    derive(secret, KeyPurpose::EidKey, &mut key[..])?;
    Ok(key)
}

/// Derive the 16-byte tunnel id from the QR secret
pub fn derive_tunnel_id(secret: &[u8]) -> Result<[u8; 16]> {
    let mut id = [0u8; 16];
    derive(secret, KeyPurpose::TunnelId, &mut id)?;
    Ok(id)
}

/// Decoded EID plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EidPlaintext {
    pub nonce: [u8; 10],
    pub routing_id: [u8; 3],
    pub tunnel_server_id: u16,
}

impl EidPlaintext {
    /// New plaintext with a random nonce
    pub fn random(routing_id: [u8; 3], tunnel_server_id: u16) -> Self {
        let mut nonce = [0u8; 10];
        OsRng.fill_bytes(&mut nonce);
        Self {
            nonce,
            routing_id,
            tunnel_server_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; PLAINTEXT_LENGTH] {
        let mut out = [0u8; PLAINTEXT_LENGTH];
        out[1..11].copy_from_slice(&self.nonce);
        out[11..14].copy_from_slice(&self.routing_id);
        out[14..16].copy_from_slice(&self.tunnel_server_id.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; PLAINTEXT_LENGTH]) -> Result<Self> {
        if bytes[0] != 0 {
            return Err(CryptoError::InvalidEidPlaintext);
        }
        let mut nonce = [0u8; 10];
        let mut routing_id = [0u8; 3];
        nonce.copy_from_slice(&bytes[1..11]);
        routing_id.copy_from_slice(&bytes[11..14]);
        Ok(Self {
            nonce,
            routing_id,
            tunnel_server_id: u16::from_le_bytes([bytes[14], bytes[15]]),
        })
    }
}

fn tag(key: &[u8; EID_KEY_LENGTH], ciphertext: &[u8]) -> Result<[u8; TAG_LENGTH]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key[32..])
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    mac.update(ciphertext);
    let full = mac.finalize().into_bytes();

    let mut out = [0u8; TAG_LENGTH];
    out.copy_from_slice(&full[..TAG_LENGTH]);
    Ok(out)
}

/// Seal a plaintext into a 20-byte EID
///
/// ```
/// use fido_client_crypto::eid::{self, EidPlaintext};
///
/// let key = eid::derive_eid_key(&[7u8; 16]).unwrap();
/// let plaintext = EidPlaintext::random([1, 2, 3], 0);
/// let advert = eid::generate_eid(&key, &plaintext).unwrap();
/// assert_eq!(eid::decrypt_eid(&key, &advert).unwrap(), plaintext);
/// ```
pub fn generate_eid(key: &[u8; EID_KEY_LENGTH], plaintext: &EidPlaintext) -> Result<[u8; EID_LENGTH]> {
    let cipher = Aes256::new(GenericArray::from_slice(&key[..32]));
    let mut block = GenericArray::clone_from_slice(&plaintext.to_bytes());
    cipher.encrypt_block(&mut block);

    let mut eid = [0u8; EID_LENGTH];
    eid[..PLAINTEXT_LENGTH].copy_from_slice(&block);
    eid[PLAINTEXT_LENGTH..].copy_from_slice(&tag(key, &block)?);
    Ok(eid)
}

/// Authenticate and decrypt a 20-byte EID
pub fn decrypt_eid(key: &[u8; EID_KEY_LENGTH], eid: &[u8]) -> Result<EidPlaintext> {
    if eid.len() != EID_LENGTH {
        return Err(CryptoError::InvalidLength {
            expected: EID_LENGTH,
            actual: eid.len(),
        });
    }

    let (ciphertext, received_tag) = eid.split_at(PLAINTEXT_LENGTH);
    let expected_tag = tag(key, ciphertext)?;
    if !bool::from(expected_tag.ct_eq(received_tag)) {
        return Err(CryptoError::EidTagMismatch);
    }

    let cipher = Aes256::new(GenericArray::from_slice(&key[..32]));
    let mut block = GenericArray::clone_from_slice(ciphertext);
    cipher.decrypt_block(&mut block);

    let mut plaintext = [0u8; PLAINTEXT_LENGTH];
    plaintext.copy_from_slice(&block);
    EidPlaintext::from_bytes(&plaintext)
}

//! Authenticator data
//!
//! ```text
//! rpIdHash (32) || flags (1) || signCount (4, BE) || [attestedCredentialData] || [extensions]
//! attestedCredentialData = aaguid (16) || credentialIdLength (2, BE) || credentialId || COSE_Key
//! ```
//!
//! <https://www.w3.org/TR/webauthn-2/#sctn-authenticator-data>

use crate::cbor;
use crate::cose::CoseKey;
use crate::status::{Result, StatusCode};

use alloc::vec::Vec;

use fido_client_crypto::rp_id_hash;

/// Flag bits
pub mod flags {
    /// User present
    pub const UP: u8 = 0x01;
    /// User verified
    pub const UV: u8 = 0x04;
    /// Attested credential data included
    pub const AT: u8 = 0x40;
    /// Extension data included
    pub const ED: u8 = 0x80;
}

/// All-zero AAGUID, used when attestation is "none"
pub const ZERO_AAGUID: [u8; 16] = [0u8; 16];

const HEADER_LENGTH: usize = 32 + 1 + 4;

/// Credential data attached to a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE_Key as encoded by the authenticator
    pub credential_public_key: Vec<u8>,
}

impl AttestedCredentialData {
    pub fn new(aaguid: [u8; 16], credential_id: Vec<u8>, public_key: &CoseKey) -> Result<Self> {
        if credential_id.len() > u16::MAX as usize {
            return Err(StatusCode::InvalidLength);
        }
        Ok(Self {
            aaguid,
            credential_id,
            credential_public_key: public_key.encode()?,
        })
    }

    /// Decoded credential public key (EC2 only)
    pub fn public_key(&self) -> Result<CoseKey> {
        CoseKey::decode(&self.credential_public_key)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.aaguid);
        out.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.credential_id);
        out.extend_from_slice(&self.credential_public_key);
    }

    /// Parse from the start of `data`, returning the bytes consumed
    fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 18 {
            return Err(StatusCode::InvalidLength);
        }
        let mut aaguid = [0u8; 16];
        aaguid.copy_from_slice(&data[..16]);

        let id_len = u16::from_be_bytes([data[16], data[17]]) as usize;
        let key_start = 18 + id_len;
        if data.len() < key_start {
            return Err(StatusCode::InvalidLength);
        }
        let key_len = cbor::item_length(&data[key_start..])?;

        Ok((
            Self {
                aaguid,
                credential_id: data[18..key_start].to_vec(),
                credential_public_key: data[key_start..key_start + key_len].to_vec(),
            },
            key_start + key_len,
        ))
    }
}

/// Parsed or constructed authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    /// Extension outputs as one encoded CBOR map
    pub extensions: Option<Vec<u8>>,
}

impl AuthenticatorData {
    /// Authenticator data for `rp_id` with the given UP/UV flags
    pub fn new(rp_id: &str, flags: u8, sign_count: u32) -> Self {
        Self::with_rp_id_hash(rp_id_hash(rp_id), flags, sign_count)
    }

    pub fn with_rp_id_hash(rp_id_hash: [u8; 32], flags: u8, sign_count: u32) -> Self {
        Self {
            rp_id_hash,
            flags: flags & !(flags::AT | flags::ED),
            sign_count,
            attested_credential_data: None,
            extensions: None,
        }
    }

    pub fn with_attested_credential_data(mut self, data: AttestedCredentialData) -> Self {
        self.flags |= flags::AT;
        self.attested_credential_data = Some(data);
        self
    }

    pub fn is_user_present(&self) -> bool {
        self.flags & flags::UP != 0
    }

    pub fn is_user_verified(&self) -> bool {
        self.flags & flags::UV != 0
    }

    /// Credential id from the attested credential data, if any
    pub fn credential_id(&self) -> Option<&[u8]> {
        self.attested_credential_data
            .as_ref()
            .map(|data| data.credential_id.as_slice())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LENGTH + 128);
        out.extend_from_slice(&self.rp_id_hash);

        let mut flags = self.flags & !(flags::AT | flags::ED);
        if self.attested_credential_data.is_some() {
            flags |= flags::AT;
        }
        if self.extensions.is_some() {
            flags |= flags::ED;
        }
        out.push(flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());

        if let Some(data) = &self.attested_credential_data {
            data.encode_into(&mut out);
        }
        if let Some(extensions) = &self.extensions {
            out.extend_from_slice(extensions);
        }
        out
    }

    /// Parse authenticator data; trailing bytes are an error
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LENGTH {
            return Err(StatusCode::InvalidLength);
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        let flags = data[32];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut pos = HEADER_LENGTH;
        let attested_credential_data = if flags & flags::AT != 0 {
            let (parsed, used) = AttestedCredentialData::parse(&data[pos..])?;
            pos += used;
            Some(parsed)
        } else {
            None
        };

        let extensions = if flags & flags::ED != 0 {
            let len = cbor::item_length(&data[pos..])?;
            let ext = data[pos..pos + len].to_vec();
            pos += len;
            Some(ext)
        } else {
            None
        };

        if pos != data.len() {
            return Err(StatusCode::InvalidLength);
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential_data,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::vec;
    use fido_client_crypto::sha256;

    fn sample_key() -> CoseKey {
        CoseKey::es256([0xAB; 32], [0xCD; 32])
    }

    #[test]
    fn test_assertion_layout() {
        let data = AuthenticatorData::new("example.com", flags::UP, 0x01020304);
        let encoded = data.encode();

        assert_eq!(encoded.len(), 37);
        assert_eq!(&encoded[..32], &sha256(b"example.com"));
        assert_eq!(encoded[32], 0x01);
        assert_eq!(&encoded[33..], &[1, 2, 3, 4]);
        assert_eq!(AuthenticatorData::decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_attested_credential_layout() {
        let attested =
            AttestedCredentialData::new(ZERO_AAGUID, vec![0x42; 20], &sample_key()).unwrap();
        let data = AuthenticatorData::new("example.com", flags::UP | flags::UV, 0)
            .with_attested_credential_data(attested);
        let encoded = data.encode();

        assert_eq!(encoded[32], flags::UP | flags::UV | flags::AT);
        assert_eq!(&encoded[37..53], &ZERO_AAGUID);
        assert_eq!(&encoded[53..55], &[0x00, 20]);
        assert_eq!(&encoded[55..75], &[0x42; 20]);

        let decoded = AuthenticatorData::decode(&encoded).unwrap();
        assert_eq!(decoded.credential_id(), Some(&[0x42u8; 20][..]));
        assert_eq!(
            decoded.attested_credential_data.unwrap().public_key().unwrap(),
            sample_key()
        );
    }

    #[test]
    fn test_extensions_after_credential() {
        let extensions = crate::cbor::MapBuilder::new()
            .insert(1, true)
            .unwrap()
            .build()
            .unwrap();
        let mut data = AuthenticatorData::new("example.com", flags::UP, 7)
            .with_attested_credential_data(
                AttestedCredentialData::new(ZERO_AAGUID, vec![1, 2, 3], &sample_key()).unwrap(),
            );
        data.extensions = Some(extensions.clone());

        let encoded = data.encode();
        assert_eq!(encoded[32] & flags::ED, flags::ED);

        let decoded = AuthenticatorData::decode(&encoded).unwrap();
        assert_eq!(decoded.extensions, Some(extensions));
        assert_eq!(decoded.credential_id(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_decode_rejects_short() {
        assert_eq!(
            AuthenticatorData::decode(&[0u8; 36]).unwrap_err(),
            StatusCode::InvalidLength
        );
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = AuthenticatorData::new("example.com", flags::UP, 0).encode();
        encoded.push(0x00);
        assert_eq!(
            AuthenticatorData::decode(&encoded).unwrap_err(),
            StatusCode::InvalidLength
        );
    }

    #[test]
    fn test_decode_rejects_truncated_credential_id() {
        let mut encoded = AuthenticatorData::new("example.com", flags::UP, 0).encode();
        encoded[32] |= flags::AT;
        encoded.extend_from_slice(&ZERO_AAGUID);
        encoded.extend_from_slice(&[0x00, 0x40]);
        encoded.extend_from_slice(&[0x01; 10]);

        assert_eq!(
            AuthenticatorData::decode(&encoded).unwrap_err(),
            StatusCode::InvalidLength
        );
    }

    #[test]
    fn test_flag_helpers() {
        let data = AuthenticatorData::new("example.com", flags::UP, 0);
        assert!(data.is_user_present());
        assert!(!data.is_user_verified());
    }
}

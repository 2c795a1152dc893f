//! COSE_Key encoding of EC2 public keys
//!
//! ES256 keys are encoded as `{1: 2, 3: -7, -1: 1, -2: x, -3: y}`:
//! <https://www.rfc-editor.org/rfc/rfc8152.html#section-13.1.1>

use crate::cbor::{MapBuilder, MapParser};
use crate::status::{Result, StatusCode};
use crate::types::CoseAlgorithm;

use alloc::vec::Vec;

use fido_client_crypto::ecdsa;

mod label {
    pub const KTY: i32 = 1;
    pub const ALG: i32 = 3;
    pub const CRV: i32 = -1;
    pub const X: i32 = -2;
    pub const Y: i32 = -3;
}

/// Key type EC2
pub const KTY_EC2: i32 = 2;

/// Curve P-256
pub const CRV_P256: i32 = 1;

/// An EC2 public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub alg: i32,
    pub crv: i32,
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CoseKey {
    /// ES256 key from its affine coordinates
    pub fn es256(x: [u8; 32], y: [u8; 32]) -> Self {
        Self {
            alg: CoseAlgorithm::ES256.to_i32(),
            crv: CRV_P256,
            x,
            y,
        }
    }

    /// ES256 key from an uncompressed SEC1 point
    pub fn from_sec1(public_key: &[u8]) -> Result<Self> {
        let (x, y) = ecdsa::public_key_coordinates(public_key)?;
        Ok(Self::es256(x, y))
    }

    /// Uncompressed SEC1 point (`0x04 || x || y`)
    pub fn to_sec1(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0] = 0x04;
        out[1..33].copy_from_slice(&self.x);
        out[33..].copy_from_slice(&self.y);
        out
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        MapBuilder::new()
            .insert(label::KTY, KTY_EC2)?
            .insert(label::ALG, self.alg)?
            .insert(label::CRV, self.crv)?
            .insert_bytes(label::X, &self.x)?
            .insert_bytes(label::Y, &self.y)?
            .build()
    }

    /// Decode an EC2 key; other key types are rejected
    pub fn decode(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let kty: i32 = parser.get(label::KTY)?;
        if kty != KTY_EC2 {
            return Err(StatusCode::UnsupportedAlgorithm);
        }

        Ok(Self {
            alg: parser.get(label::ALG)?,
            crv: parser.get(label::CRV)?,
            x: coordinate(parser.get_bytes(label::X)?)?,
            y: coordinate(parser.get_bytes(label::Y)?)?,
        })
    }
}

fn coordinate(bytes: Vec<u8>) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| StatusCode::InvalidLength)
}

//! Hybrid (caBLE v2) handshake
//!
//! The client shows a QR code carrying its identity key and a random seed.
//! The phone derives the EID key from the seed and advertises an encrypted
//! EID over BLE; the client scans, decrypts it and hands the result to a
//! [`TunnelConnector`] which opens the actual CTAP2 tunnel.

use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fido_client_crypto::KeyPair;
use fido_client_crypto::ecdsa::{COMPRESSED_POINT_LENGTH, compress_public_key};
use fido_client_crypto::eid::{
    self, EidKey, EidPlaintext, SECRET_LENGTH, decrypt_eid, derive_eid_key, generate_eid,
};
use fido_client_ctap::StatusCode;
use fido_client_ctap::cbor::{MapBuilder, MapParser};
use serde_bytes::Bytes;

use crate::ble::{self, BlePlatform};
use crate::connection::{CancelToken, CtapConnection};
use crate::error::{Error, Result};

/// URI prefix of a hybrid QR code
pub const QR_PREFIX: &str = "FIDO:/";

/// Protocol version announced in the QR code
pub const HANDSHAKE_VERSION: u32 = 2;

/// Digits needed for a trailing chunk of n bytes (n < 7)
const PARTIAL_WIDTHS: [usize; 7] = [0, 3, 5, 8, 10, 13, 15];
const CHUNK_BYTES: usize = 7;
const CHUNK_DIGITS: usize = 17;

mod keys {
    pub const PUBLIC_KEY: i32 = 0;
    pub const SECRET: i32 = 1;
    pub const VERSION: i32 = 2;
    pub const TIMESTAMP: i32 = 3;
    pub const SUPPORTS_LINKING: i32 = 4;
    pub const REQUEST_TYPE: i32 = 5;
}

/// Operation the QR code was generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    GetAssertion,
    MakeCredential,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::GetAssertion => "ga",
            RequestType::MakeCredential => "mc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ga" => Some(RequestType::GetAssertion),
            "mc" => Some(RequestType::MakeCredential),
            _ => None,
        }
    }
}

/// Contents of a hybrid QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeData {
    /// Compressed P-256 identity key of the client
    pub public_key: [u8; COMPRESSED_POINT_LENGTH],
    pub secret: [u8; SECRET_LENGTH],
    pub version: u32,
    /// Seconds since the Unix epoch
    pub timestamp: Option<u64>,
    pub supports_linking: Option<bool>,
    pub request_type: Option<RequestType>,
}

impl HandshakeData {
    /// Fresh handshake for `identity` with a random secret
    pub fn generate(identity: &KeyPair, request_type: RequestType) -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .ok();

        Ok(Self {
            public_key: compress_public_key(identity.public_key())?,
            secret: rand::random(),
            version: HANDSHAKE_VERSION,
            timestamp,
            supports_linking: Some(false),
            request_type: Some(request_type),
        })
    }

    pub fn eid_key(&self) -> Result<EidKey> {
        Ok(derive_eid_key(&self.secret)?)
    }

    pub fn tunnel_id(&self) -> Result<[u8; 16]> {
        Ok(eid::derive_tunnel_id(&self.secret)?)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let encoded = MapBuilder::new()
            .insert(keys::PUBLIC_KEY, Bytes::new(&self.public_key))?
            .insert(keys::SECRET, Bytes::new(&self.secret))?
            .insert(keys::VERSION, self.version)?
            .insert_opt(keys::TIMESTAMP, self.timestamp)?
            .insert_opt(keys::SUPPORTS_LINKING, self.supports_linking)?
            .insert_opt(keys::REQUEST_TYPE, self.request_type.map(|t| t.as_str()))?
            .build()?;
        Ok(encoded)
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let public_key = parser
            .get_bytes(keys::PUBLIC_KEY)?
            .try_into()
            .map_err(|_| StatusCode::InvalidLength)?;
        let secret = parser
            .get_bytes(keys::SECRET)?
            .try_into()
            .map_err(|_| StatusCode::InvalidLength)?;
        let request_type = parser
            .get_opt::<String>(keys::REQUEST_TYPE)?
            .and_then(|s| RequestType::parse(&s));

        Ok(Self {
            public_key,
            secret,
            version: parser.get_opt(keys::VERSION)?.unwrap_or(0),
            timestamp: parser.get_opt(keys::TIMESTAMP)?,
            supports_linking: parser.get_opt(keys::SUPPORTS_LINKING)?,
            request_type,
        })
    }

    /// `FIDO:/` URI for the QR code
    pub fn to_qr_string(&self) -> Result<String> {
        Ok(format!("{}{}", QR_PREFIX, encode_digits(&self.to_cbor()?)))
    }

    pub fn from_qr_string(qr: &str) -> Result<Self> {
        let digits = qr.strip_prefix(QR_PREFIX).ok_or(Error::InvalidResponse)?;
        Self::from_cbor(&decode_digits(digits)?)
    }
}

/// Encode bytes as decimal digits, 17 digits per 7-byte little-endian chunk
pub fn encode_digits(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(CHUNK_BYTES) * CHUNK_DIGITS);

    for chunk in data.chunks(CHUNK_BYTES) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        let value = u64::from_le_bytes(buf);
        let width = if chunk.len() == CHUNK_BYTES {
            CHUNK_DIGITS
        } else {
            PARTIAL_WIDTHS[chunk.len()]
        };
        // Writing to a String cannot fail
        let _ = write!(out, "{:0width$}", value, width = width);
    }
    out
}

/// Inverse of [`encode_digits`]
pub fn decode_digits(digits: &str) -> Result<Vec<u8>> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidResponse);
    }

    let full_chunks = digits.len() / CHUNK_DIGITS;
    let rest = &digits[full_chunks * CHUNK_DIGITS..];
    let rest_bytes = PARTIAL_WIDTHS
        .iter()
        .position(|&w| w == rest.len())
        .ok_or(Error::InvalidResponse)?;

    let mut out = Vec::with_capacity(full_chunks * CHUNK_BYTES + rest_bytes);
    let chunks = (0..full_chunks).map(|i| (&digits[i * CHUNK_DIGITS..(i + 1) * CHUNK_DIGITS], CHUNK_BYTES));
    let tail = (rest_bytes > 0).then_some((rest, rest_bytes));

    for (text, len) in chunks.chain(tail) {
        let value: u64 = text.parse().map_err(|_| Error::InvalidResponse)?;
        if value >> (8 * len) != 0 {
            return Err(Error::InvalidResponse);
        }
        out.extend_from_slice(&value.to_le_bytes()[..len]);
    }
    Ok(out)
}

/// Opens the encrypted CTAP2 tunnel announced by an EID
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    async fn connect(
        &self,
        handshake: &HandshakeData,
        advert: &EidPlaintext,
    ) -> Result<Box<dyn CtapConnection>>;
}

/// Scan until an advert sealed with this handshake's EID key shows up
///
/// Adverts from other sessions fail the tag check and are skipped.
pub async fn discover(
    platform: &dyn BlePlatform,
    handshake: &HandshakeData,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<EidPlaintext> {
    let key = handshake.eid_key()?;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }

        let advert = ble::scan_for_eid(platform, remaining, cancel).await?;
        match decrypt_eid(&key, &advert) {
            Ok(plaintext) => {
                tracing::info!(
                    tunnel_server = plaintext.tunnel_server_id,
                    "Hybrid advert found"
                );
                return Ok(plaintext);
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring advert for another session"),
        }
    }
}

/// Authenticator side: advertise an EID for a scanned QR code
///
/// Returns the plaintext so the caller can open the matching tunnel.
pub async fn advertise(
    platform: &dyn BlePlatform,
    handshake: &HandshakeData,
    routing_id: [u8; 3],
    tunnel_server_id: u16,
    duration: Duration,
    cancel: &CancelToken,
) -> Result<EidPlaintext> {
    let key = handshake.eid_key()?;
    let plaintext = EidPlaintext::random(routing_id, tunnel_server_id);
    let eid = generate_eid(&key, &plaintext)?;

    ble::advertise_eid(platform, eid, duration, cancel).await?;
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_widths() {
        assert_eq!(encode_digits(&[]), "");
        assert_eq!(encode_digits(&[1]), "001");
        assert_eq!(encode_digits(&[0xFF, 0xFF]), "65535");
        assert_eq!(encode_digits(&[1, 0, 0, 0, 0, 0, 0]), "00000000000000001");
        assert_eq!(encode_digits(&[0; 8]).len(), 17 + 3);
    }

    #[test]
    fn test_decode_digits() {
        let data: Vec<u8> = (0..=40).collect();
        let digits = encode_digits(&data);

        assert_eq!(digits.len(), 5 * 17 + 15);
        assert_eq!(decode_digits(&digits).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        // 18 digits: remainder 1 is not a valid width
        assert!(decode_digits(&"0".repeat(18)).is_err());
        // Value needs more than 7 bytes
        assert!(decode_digits("99999999999999999").is_err());
        // 3 digits for 1 byte cannot exceed 255
        assert!(decode_digits("256").is_err());
        assert!(decode_digits("12a").is_err());
    }

    #[test]
    fn test_qr_string() {
        let identity = KeyPair::generate();
        let handshake = HandshakeData::generate(&identity, RequestType::MakeCredential).unwrap();

        let qr = handshake.to_qr_string().unwrap();
        assert!(qr.starts_with("FIDO:/"));
        assert!(qr[6..].bytes().all(|b| b.is_ascii_digit()));

        let parsed = HandshakeData::from_qr_string(&qr).unwrap();
        assert_eq!(parsed, handshake);
        assert_eq!(parsed.request_type, Some(RequestType::MakeCredential));
        assert_eq!(
            fido_client_crypto::ecdsa::decompress_public_key(&parsed.public_key).unwrap(),
            *identity.public_key()
        );
    }

    #[test]
    fn test_minimal_qr_payload() {
        let encoded = MapBuilder::new()
            .insert(0, Bytes::new(&[2; 33]))
            .unwrap()
            .insert(1, Bytes::new(&[9; 16]))
            .unwrap()
            .build()
            .unwrap();

        let parsed = HandshakeData::from_cbor(&encoded).unwrap();
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.timestamp, None);
        assert_eq!(parsed.request_type, None);
    }

    #[test]
    fn test_missing_secret_rejected() {
        let encoded = MapBuilder::new()
            .insert(0, Bytes::new(&[2; 33]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            HandshakeData::from_cbor(&encoded).unwrap_err(),
            Error::Ctap2Status(StatusCode::MissingParameter)
        );
    }

    #[test]
    fn test_missing_prefix_rejected() {
        assert_eq!(
            HandshakeData::from_qr_string("0123").unwrap_err(),
            Error::InvalidResponse
        );
    }

    #[test]
    fn test_eid_sealed_for_handshake_opens() {
        let identity = KeyPair::generate();
        let handshake = HandshakeData::generate(&identity, RequestType::GetAssertion).unwrap();
        let key = handshake.eid_key().unwrap();

        let plaintext = EidPlaintext::random([1, 2, 3], 0);
        let advert = generate_eid(&key, &plaintext).unwrap();
        assert_eq!(decrypt_eid(&key, &advert).unwrap(), plaintext);
    }
}

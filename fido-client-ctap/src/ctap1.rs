//! CTAP1 (U2F) APDU codec
//!
//! Requests use extended-length framing:
//!
//! ```text
//! CLA(0x00) INS P1 P2 Lc(3 bytes, big endian) DATA
//! ```
//!
//! Responses are `DATA SW1 SW2`. A status word other than 0x9000 is an
//! authenticator-level refusal and is reported as [`Ctap1Error::Status`],
//! separate from frames that cannot be parsed at all.

use alloc::vec::Vec;

use core::fmt;

/// Class byte for every U2F command
pub const CLA: u8 = 0x00;

/// U2F instruction codes
pub mod ins {
    pub const REGISTER: u8 = 0x01;
    pub const AUTHENTICATE: u8 = 0x02;
    pub const VERSION: u8 = 0x03;
}

/// Length of the challenge and application parameters
pub const PARAM_LENGTH: usize = 32;

/// Length of an uncompressed P-256 user public key in a register response
pub const USER_PUBLIC_KEY_LENGTH: usize = 65;

const REGISTER_RESERVED_BYTE: u8 = 0x05;

/// ISO 7816 status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const NO_ERROR: Self = Self(0x9000);
    /// NFC: more response data is available through GET RESPONSE
    pub const MORE_DATA: Self = Self(0x9100);
    /// User presence is required (U2F: touch the key)
    pub const CONDITIONS_NOT_SATISFIED: Self = Self(0x6985);
    /// Key handle not valid for this authenticator or application
    pub const WRONG_DATA: Self = Self(0x6A80);
    pub const FILE_NOT_FOUND: Self = Self(0x6A82);
    pub const WRONG_LENGTH: Self = Self(0x6700);
    pub const INS_NOT_SUPPORTED: Self = Self(0x6D00);
    pub const CLA_NOT_SUPPORTED: Self = Self(0x6E00);

    pub fn from_bytes(sw1: u8, sw2: u8) -> Self {
        Self(u16::from_be_bytes([sw1, sw2]))
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn is_success(self) -> bool {
        self == Self::NO_ERROR
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SW {:04X}", self.0)
    }
}

/// CTAP1 codec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctap1Error {
    /// The authenticator answered with a non-success status word
    Status(StatusWord),
    /// The frame does not follow the APDU layout
    MalformedFrame,
    /// The response payload does not follow the U2F layout
    MalformedResponse,
    /// The request cannot be encoded (bad parameter length)
    InvalidRequest,
}

impl fmt::Display for Ctap1Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(sw) => write!(f, "CTAP1 status {}", sw),
            Self::MalformedFrame => write!(f, "Malformed APDU frame"),
            Self::MalformedResponse => write!(f, "Malformed U2F response"),
            Self::InvalidRequest => write!(f, "Invalid U2F request"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Ctap1Error {}

/// Result type for CTAP1 operations
pub type Result<T> = core::result::Result<T, Ctap1Error>;

/// Largest data field an extended-length APDU can carry
pub const MAX_DATA_LENGTH: usize = u16::MAX as usize;

/// A command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Apdu {
    pub fn new(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self { ins, p1, p2, data }
    }

    /// Encode with a 3-byte big-endian data length
    ///
    /// The length field is extended (`00 Lc1 Lc2`), so the data may not
    /// exceed [`MAX_DATA_LENGTH`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(self.data.len()).map_err(|_| Ctap1Error::InvalidRequest)?;
        let mut out = Vec::with_capacity(7 + self.data.len());
        out.extend_from_slice(&[CLA, self.ins, self.p1, self.p2, 0x00]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decode a frame produced by [`Apdu::encode`]
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < 7 || frame[0] != CLA {
            return Err(Ctap1Error::MalformedFrame);
        }
        let len = u32::from_be_bytes([0, frame[4], frame[5], frame[6]]) as usize;
        let data = &frame[7..];
        if data.len() != len {
            return Err(Ctap1Error::MalformedFrame);
        }
        Ok(Self::new(frame[1], frame[2], frame[3], data.to_vec()))
    }
}

/// A response APDU: payload and trailing status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl ApduResponse {
    pub fn new(data: Vec<u8>, status: StatusWord) -> Self {
        Self { data, status }
    }

    /// Split the trailing status word off a raw response
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let Some((payload, sw)) = frame.split_last_chunk::<2>() else {
            return Err(Ctap1Error::MalformedFrame);
        };
        Ok(Self {
            data: payload.to_vec(),
            status: StatusWord::from_bytes(sw[0], sw[1]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.status.to_bytes());
        out
    }

    /// The payload on 0x9000, otherwise the status as an error
    pub fn into_result(self) -> Result<Vec<u8>> {
        if self.status.is_success() {
            Ok(self.data)
        } else {
            Err(Ctap1Error::Status(self.status))
        }
    }
}

/// U2F_AUTHENTICATE control byte (P1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthenticateControl {
    /// Only check whether the key handle belongs to the authenticator
    CheckOnly = 0x07,
    /// Sign after a test of user presence
    EnforceUserPresence = 0x03,
    /// Sign without requiring user presence
    DontEnforceUserPresence = 0x08,
}

/// U2F_REGISTER request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub challenge: [u8; PARAM_LENGTH],
    pub application: [u8; PARAM_LENGTH],
}

impl RegisterRequest {
    pub fn new(challenge: [u8; PARAM_LENGTH], application: [u8; PARAM_LENGTH]) -> Self {
        Self {
            challenge,
            application,
        }
    }

    pub fn to_apdu(&self) -> Apdu {
        let mut data = Vec::with_capacity(2 * PARAM_LENGTH);
        data.extend_from_slice(&self.challenge);
        data.extend_from_slice(&self.application);
        Apdu::new(ins::REGISTER, 0x00, 0x00, data)
    }
}

/// U2F_REGISTER response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Uncompressed P-256 point
    pub public_key: [u8; USER_PUBLIC_KEY_LENGTH],
    pub key_handle: Vec<u8>,
    /// DER encoded X.509 attestation certificate
    pub attestation_certificate: Vec<u8>,
    /// DER encoded ECDSA signature
    pub signature: Vec<u8>,
}

impl RegisterResponse {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&reserved, rest) = data.split_first().ok_or(Ctap1Error::MalformedResponse)?;
        if reserved != REGISTER_RESERVED_BYTE || rest.len() < USER_PUBLIC_KEY_LENGTH + 1 {
            return Err(Ctap1Error::MalformedResponse);
        }

        let (key, rest) = rest.split_at(USER_PUBLIC_KEY_LENGTH);
        let mut public_key = [0u8; USER_PUBLIC_KEY_LENGTH];
        public_key.copy_from_slice(key);

        let (&kh_len, rest) = rest.split_first().ok_or(Ctap1Error::MalformedResponse)?;
        let kh_len = kh_len as usize;
        if rest.len() < kh_len {
            return Err(Ctap1Error::MalformedResponse);
        }
        let (key_handle, rest) = rest.split_at(kh_len);

        let cert_len = der_element_length(rest)?;
        if rest.len() < cert_len {
            return Err(Ctap1Error::MalformedResponse);
        }
        let (certificate, signature) = rest.split_at(cert_len);

        Ok(Self {
            public_key,
            key_handle: key_handle.to_vec(),
            attestation_certificate: certificate.to_vec(),
            signature: signature.to_vec(),
        })
    }

    /// Fails when the key handle does not fit the one-byte length prefix
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kh_len = u8::try_from(self.key_handle.len()).map_err(|_| Ctap1Error::InvalidRequest)?;
        let mut out = Vec::new();
        out.push(REGISTER_RESERVED_BYTE);
        out.extend_from_slice(&self.public_key);
        out.push(kh_len);
        out.extend_from_slice(&self.key_handle);
        out.extend_from_slice(&self.attestation_certificate);
        out.extend_from_slice(&self.signature);
        Ok(out)
    }
}

/// Total length (header included) of the DER element at the start of `data`
fn der_element_length(data: &[u8]) -> Result<usize> {
    if data.len() < 2 || data[0] != 0x30 {
        return Err(Ctap1Error::MalformedResponse);
    }
    match data[1] {
        len @ 0x00..=0x7F => Ok(2 + len as usize),
        0x81 if data.len() >= 3 => Ok(3 + data[2] as usize),
        0x82 if data.len() >= 4 => Ok(4 + u16::from_be_bytes([data[2], data[3]]) as usize),
        _ => Err(Ctap1Error::MalformedResponse),
    }
}

/// U2F_AUTHENTICATE request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateRequest {
    pub control: AuthenticateControl,
    pub challenge: [u8; PARAM_LENGTH],
    pub application: [u8; PARAM_LENGTH],
    pub key_handle: Vec<u8>,
}

impl AuthenticateRequest {
    pub fn new(
        control: AuthenticateControl,
        challenge: [u8; PARAM_LENGTH],
        application: [u8; PARAM_LENGTH],
        key_handle: Vec<u8>,
    ) -> Self {
        Self {
            control,
            challenge,
            application,
            key_handle,
        }
    }

    pub fn to_apdu(&self) -> Result<Apdu> {
        let kh_len = u8::try_from(self.key_handle.len()).map_err(|_| Ctap1Error::InvalidRequest)?;

        let mut data = Vec::with_capacity(2 * PARAM_LENGTH + 1 + self.key_handle.len());
        data.extend_from_slice(&self.challenge);
        data.extend_from_slice(&self.application);
        data.push(kh_len);
        data.extend_from_slice(&self.key_handle);
        Ok(Apdu::new(ins::AUTHENTICATE, self.control as u8, 0x00, data))
    }
}

/// U2F_AUTHENTICATE response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateResponse {
    pub user_presence: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl AuthenticateResponse {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Ctap1Error::MalformedResponse);
        }
        Ok(Self {
            user_presence: data[0],
            counter: u32::from_be_bytes([data[1], data[2], data[3], data[4]]),
            signature: data[5..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.signature.len());
        out.push(self.user_presence);
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }
}

/// U2F_VERSION request
pub fn version_apdu() -> Apdu {
    Apdu::new(ins::VERSION, 0x00, 0x00, Vec::new())
}

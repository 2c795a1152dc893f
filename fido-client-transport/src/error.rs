//! Transport layer error types

use std::fmt;

use fido_client_crypto::CryptoError;
use fido_client_ctap::{Ctap1Error, StatusCode};

use crate::ble::BleError;

/// Transport layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid packet format
    InvalidPacket,

    /// Frame for an unexpected channel
    InvalidChannel,

    /// Unknown CTAPHID command
    InvalidCommand,

    /// Out-of-order continuation packet
    InvalidSequence,

    /// Message above the size cap
    MessageTooLarge,

    /// Too many NFC GET RESPONSE rounds
    TooManyContinuations,

    /// Response that cannot be decoded
    InvalidResponse,

    /// Timeout waiting for a response
    Timeout,

    /// Request cancelled by the caller
    Cancelled,

    /// Connection already closed
    Closed,

    /// Device not found or removed
    DeviceNotFound,

    /// CTAPHID error frame
    CtapHid(u8),

    /// CTAP1 status word other than 0x9000
    Ctap1Status(u16),

    /// Non-zero CTAP2 status byte
    Ctap2Status(StatusCode),

    /// Bluetooth discovery failure
    Ble(BleError),

    /// Hybrid key derivation or EID failure
    Crypto(CryptoError),

    /// I/O error
    IoError(String),
}

impl Error {
    /// CTAP1 "conditions not satisfied", i.e. waiting for user presence
    pub fn is_presence_required(&self) -> bool {
        matches!(self, Error::Ctap1Status(0x6985))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPacket => write!(f, "Invalid packet format"),
            Error::InvalidChannel => write!(f, "Invalid channel ID"),
            Error::InvalidCommand => write!(f, "Invalid command"),
            Error::InvalidSequence => write!(f, "Invalid sequence number"),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::TooManyContinuations => write!(f, "Too many response continuations"),
            Error::InvalidResponse => write!(f, "Malformed response"),
            Error::Timeout => write!(f, "Timeout waiting for response"),
            Error::Cancelled => write!(f, "Request cancelled"),
            Error::Closed => write!(f, "Connection closed"),
            Error::DeviceNotFound => write!(f, "Device not found"),
            Error::CtapHid(code) => write!(f, "CTAPHID error 0x{:02X}", code),
            Error::Ctap1Status(sw) => write!(f, "CTAP1 status 0x{:04X}", sw),
            Error::Ctap2Status(status) => write!(f, "CTAP2 status: {}", status),
            Error::Ble(err) => write!(f, "Bluetooth: {}", err),
            Error::Crypto(err) => write!(f, "Crypto: {}", err),
            Error::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Error::Ctap2Status(status)
    }
}

impl From<Ctap1Error> for Error {
    fn from(err: Ctap1Error) -> Self {
        match err {
            Ctap1Error::Status(sw) => Error::Ctap1Status(sw.0),
            Ctap1Error::InvalidRequest => Error::MessageTooLarge,
            _ => Error::InvalidResponse,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        Error::Crypto(err)
    }
}

impl From<BleError> for Error {
    fn from(err: BleError) -> Self {
        Error::Ble(err)
    }
}

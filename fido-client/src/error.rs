//! Error types for client operations
//!
//! Lower layers report raw CTAP status codes. [`Error::classify`] folds them
//! into the WebAuthn error taxonomy callers see.

use fido_client_crypto::CryptoError;
use fido_client_ctap::{Ctap1Error, StatusCode};
use fido_client_transport::{BleError, Error as TransportError};

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for client operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The user or authenticator refused the operation
    #[error("Operation not allowed")]
    NotAllowed,

    /// No usable authenticator supports the request
    #[error("Operation not supported")]
    NotSupported,

    /// The operation does not fit the current state
    #[error("Invalid state")]
    InvalidState,

    #[error("Operation timed out")]
    Timeout,

    /// Malformed data from an authenticator or peer
    #[error("Malformed data")]
    Data,

    #[error("Unknown error")]
    Unknown,

    #[error("Request cancelled")]
    Cancelled,

    /// CTAP1 status word other than 0x9000
    #[error("CTAP1 status 0x{0:04X}")]
    Ctap1Status(u16),

    /// Non-zero CTAP2 status byte
    #[error("CTAP2 status {0}")]
    Ctap2Status(StatusCode),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl Error {
    /// Map status carriers and transport faults onto the caller-facing taxonomy
    ///
    /// Already classified errors are returned unchanged.
    pub fn classify(self) -> Self {
        match self {
            Self::Ctap1Status(0x6985 | 0x6A80) => Self::NotAllowed,
            Self::Ctap1Status(_) => Self::Unknown,
            Self::Ctap2Status(status) => classify_status(status),
            Self::Transport(err) => classify_transport(err),
            Self::Crypto(_) => Self::Data,
            other => other,
        }
    }

    /// Faults of the physical link, after which a fresh session may succeed
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

fn classify_status(status: StatusCode) -> Error {
    match status {
        StatusCode::NoCredentials
        | StatusCode::OperationDenied
        | StatusCode::NotAllowed
        | StatusCode::CredentialExcluded => Error::NotAllowed,
        StatusCode::UnsupportedAlgorithm
        | StatusCode::UnsupportedOption
        | StatusCode::UnsupportedExtension => Error::NotSupported,
        StatusCode::KeepaliveCancel => Error::Cancelled,
        StatusCode::UserActionTimeout => Error::Timeout,
        StatusCode::InvalidCbor | StatusCode::InvalidLength | StatusCode::MissingParameter => {
            Error::Data
        }
        _ => Error::Unknown,
    }
}

fn classify_transport(err: TransportError) -> Error {
    match err {
        TransportError::Timeout => Error::Timeout,
        TransportError::Cancelled => Error::Cancelled,
        TransportError::Closed => Error::InvalidState,
        TransportError::InvalidResponse | TransportError::Ble(BleError::MalformedRecord) => {
            Error::Data
        }
        TransportError::Ble(BleError::NoAdapter | BleError::BluetoothDisabled) => {
            Error::NotSupported
        }
        TransportError::Ctap1Status(sw) => Error::Ctap1Status(sw).classify(),
        TransportError::Ctap2Status(status) => classify_status(status),
        _ => Error::Unknown,
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Ctap1Status(sw) => Self::Ctap1Status(sw),
            TransportError::Ctap2Status(status) => Self::Ctap2Status(status),
            TransportError::Cancelled => Self::Cancelled,
            TransportError::Timeout => Self::Timeout,
            TransportError::Crypto(e) => Self::Crypto(e),
            other => Self::Transport(other),
        }
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Self::Ctap2Status(status)
    }
}

impl From<Ctap1Error> for Error {
    fn from(err: Ctap1Error) -> Self {
        match err {
            Ctap1Error::Status(sw) => Self::Ctap1Status(sw.0),
            Ctap1Error::InvalidRequest => Self::InvalidState,
            Ctap1Error::MalformedFrame | Ctap1Error::MalformedResponse => Self::Data,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Self::Data
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Unknown
        }
    }
}

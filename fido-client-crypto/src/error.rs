//! Error types for cryptographic operations

#[cfg(feature = "std")]
use thiserror::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

/// Cryptographic operation errors
#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Invalid public key provided
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Invalid private key provided
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Invalid signature format
    #[error("Invalid signature")]
    InvalidSignature,

    /// Invalid input length
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Key derivation produced no output
    #[error("Key derivation failed")]
    KeyDerivationFailed,

    /// EID authentication tag did not match
    #[error("EID tag mismatch")]
    EidTagMismatch,

    /// EID decrypted to a plaintext with a reserved byte set
    #[error("Invalid EID plaintext")]
    InvalidEidPlaintext,
}

/// Cryptographic operation errors (no_std version)
#[cfg(not(feature = "std"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidPublicKey,
    InvalidPrivateKey,
    InvalidSignature,
    InvalidLength { expected: usize, actual: usize },
    KeyDerivationFailed,
    EidTagMismatch,
    InvalidEidPlaintext,
}

#[cfg(not(feature = "std"))]
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPublicKey => write!(f, "Invalid public key"),
            Self::InvalidPrivateKey => write!(f, "Invalid private key"),
            Self::InvalidSignature => write!(f, "Invalid signature"),
            Self::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {}, got {}", expected, actual)
            }
            Self::KeyDerivationFailed => write!(f, "Key derivation failed"),
            Self::EidTagMismatch => write!(f, "EID tag mismatch"),
            Self::InvalidEidPlaintext => write!(f, "Invalid EID plaintext"),
        }
    }
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;

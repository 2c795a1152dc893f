//! Cryptographic primitives for a FIDO2 client
//!
//! This crate provides the operations a client needs beyond what the
//! authenticator does for it:
//!
//! - **ECDSA**: ES256 key pairs for the platform (screen-lock) authenticator
//! - **Hashing**: SHA-256 helpers for client data and relying-party ids
//! - **EID**: sealing and opening of the 20-byte hybrid (caBLE) BLE advert
//!
//! ES256 is COSE algorithm -7: <https://www.rfc-editor.org/rfc/rfc8152.html#section-8.1>

#![cfg_attr(not(feature = "std"), no_std)]

pub mod ecdsa;
pub mod eid;
pub mod error;
pub mod hash;

// Re-export commonly used types
pub use ecdsa::KeyPair;
pub use error::{CryptoError, Result};
pub use hash::{rp_id_hash, sha256};

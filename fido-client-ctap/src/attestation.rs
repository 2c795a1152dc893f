//! WebAuthn attestation object
//!
//! `{"fmt": text, "attStmt": map, "authData": bytes}`, keys in canonical order.

use crate::cbor::{self, Value};
use crate::status::Result;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// Format name of an empty attestation
pub const FMT_NONE: &str = "none";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationObject {
    pub fmt: String,
    #[serde(rename = "attStmt")]
    pub att_stmt: Value,
    #[serde(rename = "authData", with = "serde_bytes")]
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn new(fmt: impl Into<String>, auth_data: Vec<u8>, att_stmt: Value) -> Self {
        Self {
            fmt: fmt.into(),
            att_stmt,
            auth_data,
        }
    }

    /// Attestation format "none" with an empty statement
    pub fn none(auth_data: Vec<u8>) -> Self {
        Self::new(FMT_NONE.to_string(), auth_data, Value::Map(Vec::new()))
    }

    pub fn is_none_format(&self) -> bool {
        self.fmt == FMT_NONE
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        cbor::encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        cbor::decode(data)
    }
}

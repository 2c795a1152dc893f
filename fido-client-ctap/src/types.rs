//! CTAP data types
//!
//! WebAuthn entities as they appear inside CTAP2 parameter maps. Field names
//! follow the CBOR text keys of the wire format.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// Credential type string for every FIDO2 credential
pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// Relying Party information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    /// Relying party identifier (e.g., "example.com")
    pub id: String,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// User account being registered or authenticated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User handle, opaque to the client
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl User {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            name: None,
            display_name: None,
        }
    }

    pub fn with_details(id: Vec<u8>, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            display_name: Some(display_name.into()),
        }
    }
}

/// Transports an authenticator can be reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    Hybrid,
    Internal,
}

impl AuthenticatorTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Nfc => "nfc",
            Self::Ble => "ble",
            Self::Hybrid => "hybrid",
            Self::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "usb" => Some(Self::Usb),
            "nfc" => Some(Self::Nfc),
            "ble" => Some(Self::Ble),
            "hybrid" | "cable" => Some(Self::Hybrid),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

/// Public key credential descriptor
///
/// Identifies a credential in allow and exclude lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialDescriptor {
    /// Credential ID
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    /// Always "public-key"
    pub r#type: String,

    /// Transport hints as strings, unknown values are kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

impl PublicKeyCredentialDescriptor {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            r#type: PUBLIC_KEY_TYPE.to_string(),
            transports: None,
        }
    }

    pub fn with_transports(id: Vec<u8>, transports: &[AuthenticatorTransport]) -> Self {
        Self {
            id,
            r#type: PUBLIC_KEY_TYPE.to_string(),
            transports: Some(transports.iter().map(|t| t.as_str().to_string()).collect()),
        }
    }

    /// Known transport hints
    pub fn transport_hints(&self) -> Vec<AuthenticatorTransport> {
        self.transports
            .iter()
            .flatten()
            .filter_map(|t| AuthenticatorTransport::parse(t))
            .collect()
    }

    /// Descriptor without transport hints, as sent to authenticators
    pub fn without_transports(&self) -> Self {
        Self {
            id: self.id.clone(),
            r#type: self.r#type.clone(),
            transports: None,
        }
    }
}

/// Acceptable credential type and algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub cred_type: String,

    /// COSE algorithm identifier
    pub alg: i32,
}

impl PublicKeyCredentialParameters {
    pub fn new(alg: CoseAlgorithm) -> Self {
        Self {
            cred_type: PUBLIC_KEY_TYPE.to_string(),
            alg: alg.to_i32(),
        }
    }

    /// ES256 algorithm (P-256 + SHA-256)
    pub fn es256() -> Self {
        Self::new(CoseAlgorithm::ES256)
    }
}

/// COSE algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CoseAlgorithm {
    ES256 = -7,
    EdDSA = -8,
    ES384 = -35,
    RS256 = -257,
}

impl CoseAlgorithm {
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -7 => Some(Self::ES256),
            -8 => Some(Self::EdDSA),
            -35 => Some(Self::ES384),
            -257 => Some(Self::RS256),
            _ => None,
        }
    }
}

/// Boolean request options (key 0x07 of MakeCredential, 0x05 of GetAssertion)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorOptions {
    /// Resident key (discoverable credential)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rk: Option<bool>,

    /// User presence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<bool>,

    /// User verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv: Option<bool>,
}

impl AuthenticatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rk(mut self, rk: bool) -> Self {
        self.rk = Some(rk);
        self
    }

    pub fn with_up(mut self, up: bool) -> Self {
        self.up = Some(up);
        self
    }

    pub fn with_uv(mut self, uv: bool) -> Self {
        self.uv = Some(uv);
        self
    }

    /// No option set; the map is then omitted from the request
    pub fn is_empty(&self) -> bool {
        self.rk.is_none() && self.up.is_none() && self.uv.is_none()
    }
}

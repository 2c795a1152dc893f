//! authenticatorGetInfo (0x04)
//!
//! Used by clients to learn which protocol versions and options an
//! authenticator supports before issuing requests.
//!
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorGetInfo>

use crate::cbor::{MapBuilder, MapParser};
use crate::commands::{CommandCode, Ctap2Request};
use crate::status::{Result, StatusCode};

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

mod keys {
    pub const VERSIONS: i32 = 0x01;
    pub const EXTENSIONS: i32 = 0x02;
    pub const AAGUID: i32 = 0x03;
    pub const OPTIONS: i32 = 0x04;
    pub const MAX_MSG_SIZE: i32 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOLS: i32 = 0x06;
    pub const TRANSPORTS: i32 = 0x09;
}

pub mod versions {
    pub const U2F_V2: &str = "U2F_V2";
    pub const FIDO_2_0: &str = "FIDO_2_0";
    pub const FIDO_2_1_PRE: &str = "FIDO_2_1_PRE";
    pub const FIDO_2_1: &str = "FIDO_2_1";
}

/// Decoded authenticatorGetInfo response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthenticatorInfo {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: [u8; 16],
    pub options: BTreeMap<String, bool>,
    pub max_msg_size: Option<u32>,
    pub pin_uv_auth_protocols: Vec<u8>,
    pub transports: Vec<String>,
}

impl AuthenticatorInfo {
    /// Request frame (no parameters)
    pub fn request() -> Ctap2Request {
        Ctap2Request::empty(CommandCode::GetInfo)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let aaguid = parser
            .get_bytes(keys::AAGUID)?
            .try_into()
            .map_err(|_| StatusCode::InvalidLength)?;

        Ok(Self {
            versions: parser.get(keys::VERSIONS)?,
            extensions: parser.get_opt(keys::EXTENSIONS)?.unwrap_or_default(),
            aaguid,
            options: parser.get_opt(keys::OPTIONS)?.unwrap_or_default(),
            max_msg_size: parser.get_opt(keys::MAX_MSG_SIZE)?,
            pin_uv_auth_protocols: parser
                .get_opt(keys::PIN_UV_AUTH_PROTOCOLS)?
                .unwrap_or_default(),
            transports: parser.get_opt(keys::TRANSPORTS)?.unwrap_or_default(),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        MapBuilder::new()
            .insert(keys::VERSIONS, &self.versions)?
            .insert_list(keys::EXTENSIONS, &self.extensions)?
            .insert_bytes(keys::AAGUID, &self.aaguid)?
            .insert_opt(
                keys::OPTIONS,
                (!self.options.is_empty()).then_some(&self.options),
            )?
            .insert_opt(keys::MAX_MSG_SIZE, self.max_msg_size)?
            .insert_list(keys::PIN_UV_AUTH_PROTOCOLS, &self.pin_uv_auth_protocols)?
            .insert_list(keys::TRANSPORTS, &self.transports)?
            .build()
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    /// Authenticator also speaks U2F
    pub fn supports_ctap1(&self) -> bool {
        self.supports_version(versions::U2F_V2)
    }

    pub fn supports_fido_2_1(&self) -> bool {
        self.supports_version(versions::FIDO_2_1) || self.supports_version(versions::FIDO_2_1_PRE)
    }

    /// `None` when the option is absent, which differs from `Some(false)`
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }

    pub fn client_pin_supported(&self) -> bool {
        self.option("clientPin").is_some()
    }

    pub fn uv_supported(&self) -> bool {
        self.option("uv").is_some()
    }

    pub fn resident_keys_supported(&self) -> bool {
        self.option("rk") == Some(true)
    }
}

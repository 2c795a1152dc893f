//! authenticatorMakeCredential (0x01)
//!
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorMakeCredential>

use crate::attestation::AttestationObject;
use crate::auth_data::AuthenticatorData;
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::commands::{CommandCode, Ctap2Request};
use crate::status::{Result, StatusCode};
use crate::types::{
    AuthenticatorOptions, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    RelyingParty, User,
};

use alloc::string::String;
use alloc::vec::Vec;

mod req_keys {
    pub const CLIENT_DATA_HASH: i32 = 0x01;
    pub const RP: i32 = 0x02;
    pub const USER: i32 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i32 = 0x04;
    pub const EXCLUDE_LIST: i32 = 0x05;
    pub const EXTENSIONS: i32 = 0x06;
    pub const OPTIONS: i32 = 0x07;
    pub const PIN_AUTH: i32 = 0x08;
    pub const PIN_PROTOCOL: i32 = 0x09;
}

mod resp_keys {
    pub const FMT: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const ATT_STMT: i32 = 0x03;
}

/// authenticatorMakeCredential parameters
#[derive(Debug, Clone)]
pub struct MakeCredentialRequest {
    pub client_data_hash: [u8; 32],
    pub rp: RelyingParty,
    pub user: User,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    pub extensions: Option<Value>,
    pub options: AuthenticatorOptions,
    pub pin_auth: Option<Vec<u8>>,
    pub pin_protocol: Option<u8>,
}

impl MakeCredentialRequest {
    /// Request for an ES256 credential with no exclusions
    pub fn new(client_data_hash: [u8; 32], rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            pub_key_cred_params: alloc::vec![PublicKeyCredentialParameters::es256()],
            exclude_list: Vec::new(),
            extensions: None,
            options: AuthenticatorOptions::default(),
            pin_auth: None,
            pin_protocol: None,
        }
    }

    pub fn with_params(mut self, params: Vec<PublicKeyCredentialParameters>) -> Self {
        self.pub_key_cred_params = params;
        self
    }

    pub fn with_exclude_list(mut self, exclude_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    pub fn with_options(mut self, options: AuthenticatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// Encode the CBOR parameter map
    pub fn encode(&self) -> Result<Vec<u8>> {
        let exclude_list: Vec<_> = self
            .exclude_list
            .iter()
            .map(PublicKeyCredentialDescriptor::without_transports)
            .collect();

        MapBuilder::new()
            .insert_bytes(req_keys::CLIENT_DATA_HASH, &self.client_data_hash)?
            .insert(req_keys::RP, &self.rp)?
            .insert(req_keys::USER, &self.user)?
            .insert(req_keys::PUB_KEY_CRED_PARAMS, &self.pub_key_cred_params)?
            .insert_list(req_keys::EXCLUDE_LIST, &exclude_list)?
            .insert_opt(req_keys::EXTENSIONS, self.extensions.as_ref())?
            .insert_opt(
                req_keys::OPTIONS,
                (!self.options.is_empty()).then_some(&self.options),
            )?
            .insert_opt(
                req_keys::PIN_AUTH,
                self.pin_auth.as_deref().map(serde_bytes::Bytes::new),
            )?
            .insert_opt(req_keys::PIN_PROTOCOL, self.pin_protocol)?
            .build()
    }

    /// Full request frame
    pub fn to_request(&self) -> Result<Ctap2Request> {
        Ok(Ctap2Request::new(CommandCode::MakeCredential, self.encode()?))
    }

    /// Decode a parameter map, as an authenticator would
    pub fn decode(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let client_data_hash = parser
            .get_bytes(req_keys::CLIENT_DATA_HASH)?
            .try_into()
            .map_err(|_| StatusCode::InvalidLength)?;

        Ok(Self {
            client_data_hash,
            rp: parser.get(req_keys::RP)?,
            user: parser.get(req_keys::USER)?,
            pub_key_cred_params: parser.get(req_keys::PUB_KEY_CRED_PARAMS)?,
            exclude_list: parser.get_opt(req_keys::EXCLUDE_LIST)?.unwrap_or_default(),
            extensions: parser.get_opt(req_keys::EXTENSIONS)?,
            options: parser.get_opt(req_keys::OPTIONS)?.unwrap_or_default(),
            pin_auth: parser.get_bytes_opt(req_keys::PIN_AUTH)?,
            pin_protocol: parser.get_opt(req_keys::PIN_PROTOCOL)?,
        })
    }
}

/// authenticatorMakeCredential response
#[derive(Debug, Clone)]
pub struct MakeCredentialResponse {
    pub fmt: String,
    pub auth_data: Vec<u8>,
    pub att_stmt: Value,
}

impl MakeCredentialResponse {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        Ok(Self {
            fmt: parser.get(resp_keys::FMT)?,
            auth_data: parser.get_bytes(resp_keys::AUTH_DATA)?,
            att_stmt: parser.get(resp_keys::ATT_STMT)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        MapBuilder::new()
            .insert(resp_keys::FMT, &self.fmt)?
            .insert_bytes(resp_keys::AUTH_DATA, &self.auth_data)?
            .insert(resp_keys::ATT_STMT, &self.att_stmt)?
            .build()
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        AuthenticatorData::decode(&self.auth_data)
    }

    /// WebAuthn attestation object with text keys
    pub fn into_attestation_object(self) -> AttestationObject {
        AttestationObject::new(self.fmt, self.auth_data, self.att_stmt)
    }
}

//! authenticatorGetAssertion (0x02)
//!
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorGetAssertion>

use crate::auth_data::AuthenticatorData;
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::commands::{CommandCode, Ctap2Request};
use crate::status::{Result, StatusCode};
use crate::types::{AuthenticatorOptions, PublicKeyCredentialDescriptor, User};

use alloc::string::String;
use alloc::vec::Vec;

mod req_keys {
    pub const RP_ID: i32 = 0x01;
    pub const CLIENT_DATA_HASH: i32 = 0x02;
    pub const ALLOW_LIST: i32 = 0x03;
    pub const EXTENSIONS: i32 = 0x04;
    pub const OPTIONS: i32 = 0x05;
    pub const PIN_AUTH: i32 = 0x06;
    pub const PIN_PROTOCOL: i32 = 0x07;
}

mod resp_keys {
    pub const CREDENTIAL: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const SIGNATURE: i32 = 0x03;
    pub const USER: i32 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i32 = 0x05;
}

/// authenticatorGetAssertion parameters
#[derive(Debug, Clone)]
pub struct GetAssertionRequest {
    pub rp_id: String,
    pub client_data_hash: [u8; 32],
    pub allow_list: Vec<PublicKeyCredentialDescriptor>,
    pub extensions: Option<Value>,
    pub options: AuthenticatorOptions,
    pub pin_auth: Option<Vec<u8>>,
    pub pin_protocol: Option<u8>,
}

impl GetAssertionRequest {
    pub fn new(rp_id: impl Into<String>, client_data_hash: [u8; 32]) -> Self {
        Self {
            rp_id: rp_id.into(),
            client_data_hash,
            allow_list: Vec::new(),
            extensions: None,
            options: AuthenticatorOptions::default(),
            pin_auth: None,
            pin_protocol: None,
        }
    }

    pub fn with_allow_list(mut self, allow_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.allow_list = allow_list;
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

    pub fn encode(&self) -> Result<Vec<u8>> {
        let allow_list: Vec<_> = self
            .allow_list
            .iter()
            .map(PublicKeyCredentialDescriptor::without_transports)
            .collect();

        MapBuilder::new()
            .insert(req_keys::RP_ID, &self.rp_id)?
            .insert_bytes(req_keys::CLIENT_DATA_HASH, &self.client_data_hash)?
            .insert_list(req_keys::ALLOW_LIST, &allow_list)?
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

    pub fn to_request(&self) -> Result<Ctap2Request> {
        Ok(Ctap2Request::new(CommandCode::GetAssertion, self.encode()?))
    }

    /// Decode a parameter map, as an authenticator would
    pub fn decode(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let client_data_hash = parser
            .get_bytes(req_keys::CLIENT_DATA_HASH)?
            .try_into()
            .map_err(|_| StatusCode::InvalidLength)?;

        Ok(Self {
            rp_id: parser.get(req_keys::RP_ID)?,
            client_data_hash,
            allow_list: parser.get_opt(req_keys::ALLOW_LIST)?.unwrap_or_default(),
            extensions: parser.get_opt(req_keys::EXTENSIONS)?,
            options: parser.get_opt(req_keys::OPTIONS)?.unwrap_or_default(),
            pin_auth: parser.get_bytes_opt(req_keys::PIN_AUTH)?,
            pin_protocol: parser.get_opt(req_keys::PIN_PROTOCOL)?,
        })
    }
}

/// authenticatorGetAssertion response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionResponse {
    /// Omitted by authenticators when the allow list held exactly one entry
    pub credential: Option<PublicKeyCredentialDescriptor>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: Option<User>,
    pub number_of_credentials: Option<u32>,
}

impl GetAssertionResponse {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        Ok(Self {
            credential: parser.get_opt(resp_keys::CREDENTIAL)?,
            auth_data: parser.get_bytes(resp_keys::AUTH_DATA)?,
            signature: parser.get_bytes(resp_keys::SIGNATURE)?,
            user: parser.get_opt(resp_keys::USER)?,
            number_of_credentials: parser.get_opt(resp_keys::NUMBER_OF_CREDENTIALS)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        MapBuilder::new()
            .insert_opt(resp_keys::CREDENTIAL, self.credential.as_ref())?
            .insert_bytes(resp_keys::AUTH_DATA, &self.auth_data)?
            .insert_bytes(resp_keys::SIGNATURE, &self.signature)?
            .insert_opt(resp_keys::USER, self.user.as_ref())?
            .insert_opt(resp_keys::NUMBER_OF_CREDENTIALS, self.number_of_credentials)?
            .build()
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        AuthenticatorData::decode(&self.auth_data)
    }

    /// Credential id, falling back to the single allow-list entry
    pub fn credential_id<'a>(&'a self, allow_list: &'a [PublicKeyCredentialDescriptor]) -> Option<&'a [u8]> {
        match (&self.credential, allow_list) {
            (Some(credential), _) => Some(&credential.id),
            (None, [only]) => Some(&only.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_data::flags;

    use alloc::vec;

    #[test]
    fn test_request_decodes_to_same_fields() {
        let request = GetAssertionRequest::new("example.com", [3; 32])
            .with_allow_list(vec![
                PublicKeyCredentialDescriptor::new(vec![1; 64]),
                PublicKeyCredentialDescriptor::new(vec![2; 64]),
            ])
            .with_options(AuthenticatorOptions::new().with_up(true));

        let decoded = GetAssertionRequest::decode(&request.encode().unwrap()).unwrap();

        assert_eq!(decoded.rp_id, "example.com");
        assert_eq!(decoded.client_data_hash, [3; 32]);
        assert_eq!(decoded.allow_list, request.allow_list);
        assert_eq!(decoded.options.up, Some(true));
    }

    #[test]
    fn test_empty_allow_list_omitted() {
        let encoded = GetAssertionRequest::new("example.com", [0; 32]).encode().unwrap();
        let parser = MapParser::from_bytes(&encoded).unwrap();

        assert!(!parser.contains_key(3));
        assert_eq!(parser.keys().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_request_frame_uses_get_assertion_code() {
        let frame = GetAssertionRequest::new("example.com", [0; 32])
            .to_request()
            .unwrap()
            .encode();
        assert_eq!(frame[0], 0x02);
    }

    #[test]
    fn test_response_decode() {
        let auth_data = AuthenticatorData::new("example.com", flags::UP, 42).encode();
        let encoded = MapBuilder::new()
            .insert_bytes(2, &auth_data)
            .unwrap()
            .insert_bytes(3, &[0x30, 0x44, 0x02])
            .unwrap()
            .build()
            .unwrap();

        let response = GetAssertionResponse::decode(&encoded).unwrap();
        assert!(response.credential.is_none());
        assert_eq!(response.signature, vec![0x30, 0x44, 0x02]);

        let parsed = response.authenticator_data().unwrap();
        assert_eq!(parsed.sign_count, 42);
        assert!(parsed.is_user_present());
    }

    #[test]
    fn test_response_missing_signature_fails() {
        let encoded = MapBuilder::new()
            .insert_bytes(2, &[0; 37])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            GetAssertionResponse::decode(&encoded).unwrap_err(),
            StatusCode::MissingParameter
        );
    }

    #[test]
    fn test_response_with_user_and_count() {
        let response = GetAssertionResponse {
            credential: Some(PublicKeyCredentialDescriptor::new(vec![5; 16])),
            auth_data: vec![0; 37],
            signature: vec![1, 2],
            user: Some(User::new(vec![9])),
            number_of_credentials: Some(2),
        };

        let decoded = GetAssertionResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_credential_id_fallback() {
        let response = GetAssertionResponse {
            credential: None,
            auth_data: vec![0; 37],
            signature: vec![],
            user: None,
            number_of_credentials: None,
        };
        let single = [PublicKeyCredentialDescriptor::new(vec![4; 8])];
        let many = [
            PublicKeyCredentialDescriptor::new(vec![4; 8]),
            PublicKeyCredentialDescriptor::new(vec![6; 8]),
        ];

        assert_eq!(response.credential_id(&single), Some(&[4u8; 8][..]));
        assert_eq!(response.credential_id(&many), None);
    }
}

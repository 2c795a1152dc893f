//! Relying-party requests and the client data bound to them
//!
//! A [`RequestOptions`] value is created once per request and shared
//! read-only by every transport handler.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use fido_client_crypto::sha256;
use fido_client_ctap::{
    CoseAlgorithm, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters, RelyingParty, User,
};
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::Result;

/// Attestation conveyance preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttestationPreference {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

impl AttestationPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Indirect => "indirect",
            Self::Direct => "direct",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "indirect" => Some(Self::Indirect),
            "direct" => Some(Self::Direct),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// Whether the relying party wants a discoverable credential
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResidentKeyRequirement {
    #[default]
    Discouraged,
    Preferred,
    Required,
}

/// Whether the relying party wants user verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

/// Authenticator selection criteria of a registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthenticatorSelection {
    pub resident_key: ResidentKeyRequirement,
    pub user_verification: UserVerificationRequirement,
}

/// Options of a credential registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOptions {
    pub rp: RelyingParty,
    pub user: User,
    pub challenge: Vec<u8>,
    /// Requested algorithms in order of preference; empty means ES256
    pub parameters: Vec<PublicKeyCredentialParameters>,
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    pub attestation: AttestationPreference,
    pub authenticator_selection: AuthenticatorSelection,
    pub timeout: Option<Duration>,
    /// Legacy U2F AppID, also checked against the exclude list
    pub app_id: Option<String>,
}

impl RegisterOptions {
    pub fn new(rp: RelyingParty, user: User, challenge: Vec<u8>) -> Self {
        Self {
            rp,
            user,
            challenge,
            parameters: vec![PublicKeyCredentialParameters::es256()],
            exclude_list: Vec::new(),
            attestation: AttestationPreference::None,
            authenticator_selection: AuthenticatorSelection::default(),
            timeout: None,
            app_id: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<PublicKeyCredentialParameters>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_exclude_list(mut self, exclude_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    pub fn with_attestation(mut self, attestation: AttestationPreference) -> Self {
        self.attestation = attestation;
        self
    }

    pub fn with_resident_key(mut self, requirement: ResidentKeyRequirement) -> Self {
        self.authenticator_selection.resident_key = requirement;
        self
    }

    pub fn with_user_verification(mut self, requirement: UserVerificationRequirement) -> Self {
        self.authenticator_selection.user_verification = requirement;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// True when ES256 is acceptable, which U2F authenticators require
    pub fn allows_es256(&self) -> bool {
        self.parameters.is_empty()
            || self
                .parameters
                .iter()
                .any(|p| p.alg == CoseAlgorithm::ES256.to_i32())
    }
}

/// Options of an assertion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOptions {
    pub rp_id: String,
    pub challenge: Vec<u8>,
    /// Acceptable credentials; empty means any discoverable credential
    pub allow_list: Vec<PublicKeyCredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
    pub timeout: Option<Duration>,
    /// Legacy U2F AppID, tried when the rp id is rejected
    pub app_id: Option<String>,
}

impl SignOptions {
    pub fn new(rp_id: impl Into<String>, challenge: Vec<u8>) -> Self {
        Self {
            rp_id: rp_id.into(),
            challenge,
            allow_list: Vec::new(),
            user_verification: UserVerificationRequirement::default(),
            timeout: None,
            app_id: None,
        }
    }

    pub fn with_allow_list(mut self, allow_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_user_verification(mut self, requirement: UserVerificationRequirement) -> Self {
        self.user_verification = requirement;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }
}

/// A relying-party request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOptions {
    Register(RegisterOptions),
    Sign(SignOptions),
}

impl RequestOptions {
    pub fn rp_id(&self) -> &str {
        match self {
            Self::Register(options) => &options.rp.id,
            Self::Sign(options) => &options.rp_id,
        }
    }

    pub fn challenge(&self) -> &[u8] {
        match self {
            Self::Register(options) => &options.challenge,
            Self::Sign(options) => &options.challenge,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Register(options) => options.timeout,
            Self::Sign(options) => options.timeout,
        }
    }

    pub fn user_verification(&self) -> UserVerificationRequirement {
        match self {
            Self::Register(options) => options.authenticator_selection.user_verification,
            Self::Sign(options) => options.user_verification,
        }
    }

    pub fn client_data_type(&self) -> ClientDataType {
        match self {
            Self::Register(_) => ClientDataType::Create,
            Self::Sign(_) => ClientDataType::Get,
        }
    }
}

impl From<RegisterOptions> for RequestOptions {
    fn from(options: RegisterOptions) -> Self {
        Self::Register(options)
    }
}

impl From<SignOptions> for RequestOptions {
    fn from(options: SignOptions) -> Self {
        Self::Sign(options)
    }
}

/// Ceremony recorded in client data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientDataType {
    #[serde(rename = "webauthn.create")]
    Create,
    #[serde(rename = "webauthn.get")]
    Get,
}

/// WebAuthn collected client data
///
/// Serialized as JSON; the SHA-256 of that JSON is the `clientDataHash` sent
/// to authenticators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: ClientDataType,

    /// base64url without padding
    pub challenge: String,

    pub origin: String,

    #[serde(rename = "androidPackageName", skip_serializing_if = "Option::is_none")]
    pub android_package_name: Option<String>,
}

impl ClientData {
    pub fn new(options: &RequestOptions, config: &ClientConfig) -> Self {
        let origin = config
            .origin
            .clone()
            .unwrap_or_else(|| format!("https://{}", options.rp_id()));

        Self {
            kind: options.client_data_type(),
            challenge: URL_SAFE_NO_PAD.encode(options.challenge()),
            origin,
            android_package_name: config.package_name.clone(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Client data JSON and its hash, computed once per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedClientData {
    pub json: Vec<u8>,
    pub hash: [u8; 32],
}

impl CollectedClientData {
    pub fn collect(options: &RequestOptions, config: &ClientConfig) -> Result<Self> {
        let json = ClientData::new(options, config).to_json()?;
        let hash = sha256(&json);
        Ok(Self { json, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register() -> RequestOptions {
        RegisterOptions::new(
            RelyingParty::new("example.com"),
            User::with_details(vec![1, 2, 3], "alice", "Alice"),
            vec![0xFB; 32],
        )
        .into()
    }

    #[test]
    fn test_client_data_json() {
        let config = ClientConfig::default().with_package_name("com.example.app");
        let data = ClientData::new(&register(), &config);
        let json: serde_json::Value = serde_json::from_slice(&data.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "webauthn.create");
        assert_eq!(json["origin"], "https://example.com");
        assert_eq!(json["androidPackageName"], "com.example.app");

        let challenge = json["challenge"].as_str().unwrap();
        assert!(!challenge.contains('='));
        assert_eq!(URL_SAFE_NO_PAD.decode(challenge).unwrap(), vec![0xFB; 32]);
    }

    #[test]
    fn test_sign_client_data() {
        let options: RequestOptions = SignOptions::new("example.com", b"nonce".to_vec()).into();
        let config = ClientConfig::default().with_origin("https://accounts.example.com");
        let data = ClientData::new(&options, &config);

        assert_eq!(data.kind, ClientDataType::Get);
        assert_eq!(data.origin, "https://accounts.example.com");

        let json = String::from_utf8(data.to_json().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"webauthn.get\""));
        assert!(!json.contains("androidPackageName"));
    }

    #[test]
    fn test_collected_hash() {
        let collected = CollectedClientData::collect(&register(), &ClientConfig::default()).unwrap();
        assert_eq!(collected.hash, sha256(&collected.json));
    }

    #[test]
    fn test_es256_acceptance() {
        let RequestOptions::Register(options) = register() else {
            unreachable!()
        };
        assert!(options.allows_es256());
        assert!(options.clone().with_parameters(Vec::new()).allows_es256());

        let rs256_only = options.with_parameters(vec![PublicKeyCredentialParameters::new(
            CoseAlgorithm::RS256,
        )]);
        assert!(!rs256_only.allows_es256());
    }

    #[test]
    fn test_attestation_preference_strings() {
        for pref in [
            AttestationPreference::None,
            AttestationPreference::Indirect,
            AttestationPreference::Direct,
            AttestationPreference::Enterprise,
        ] {
            assert_eq!(AttestationPreference::parse(pref.as_str()), Some(pref));
        }
        assert_eq!(AttestationPreference::parse("self"), None);
    }
}

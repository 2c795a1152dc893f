//! Canonical responses returned to the caller
//!
//! Every transport produces the same two shapes: an attestation for a
//! registration and an assertion for a sign request.

use fido_client_ctap::{AttestationObject, AuthenticatorData, AuthenticatorTransport};

use crate::error::Result;

/// Result of a registration
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationResponse {
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    /// CBOR attestation object
    pub attestation_object: Vec<u8>,
    /// Transports the new credential can be used over
    pub transports: Vec<AuthenticatorTransport>,
}

impl AttestationResponse {
    pub fn attestation(&self) -> Result<AttestationObject> {
        Ok(AttestationObject::decode(&self.attestation_object)?)
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        Ok(AuthenticatorData::decode(&self.attestation()?.auth_data)?)
    }
}

/// Result of a sign request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResponse {
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    /// DER-encoded ECDSA signature over `authenticatorData || clientDataHash`
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

impl AssertionResponse {
    pub fn authenticator_data(&self) -> Result<AuthenticatorData> {
        Ok(AuthenticatorData::decode(&self.authenticator_data)?)
    }

    /// The exact bytes the authenticator signed
    pub fn signed_data(&self, client_data_hash: &[u8; 32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.authenticator_data.len() + 32);
        data.extend_from_slice(&self.authenticator_data);
        data.extend_from_slice(client_data_hash);
        data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticatorResponse {
    Attestation(AttestationResponse),
    Assertion(AssertionResponse),
}

impl AuthenticatorResponse {
    pub fn credential_id(&self) -> &[u8] {
        match self {
            Self::Attestation(response) => &response.credential_id,
            Self::Assertion(response) => &response.credential_id,
        }
    }

    pub fn client_data_json(&self) -> &[u8] {
        match self {
            Self::Attestation(response) => &response.client_data_json,
            Self::Assertion(response) => &response.client_data_json,
        }
    }

    pub fn as_attestation(&self) -> Option<&AttestationResponse> {
        match self {
            Self::Attestation(response) => Some(response),
            Self::Assertion(_) => None,
        }
    }

    pub fn as_assertion(&self) -> Option<&AssertionResponse> {
        match self {
            Self::Assertion(response) => Some(response),
            Self::Attestation(_) => None,
        }
    }
}

impl From<AttestationResponse> for AuthenticatorResponse {
    fn from(response: AttestationResponse) -> Self {
        Self::Attestation(response)
    }
}

impl From<AssertionResponse> for AuthenticatorResponse {
    fn from(response: AssertionResponse) -> Self {
        Self::Assertion(response)
    }
}

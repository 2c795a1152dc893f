//! Client-side CTAP codecs
//!
//! Request encoders and response decoders for CTAP1 (U2F) and CTAP2, plus the
//! WebAuthn structures carried inside them: authenticator data, COSE keys and
//! attestation objects.
//!
//! Implements the FIDO2 specification:
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html>

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod attestation;
pub mod auth_data;
pub mod cbor;
pub mod commands;
pub mod cose;
pub mod ctap1;
pub mod status;
pub mod types;

pub use attestation::AttestationObject;
pub use auth_data::{AttestedCredentialData, AuthenticatorData};
pub use commands::get_assertion::{GetAssertionRequest, GetAssertionResponse};
pub use commands::get_info::AuthenticatorInfo;
pub use commands::make_credential::{MakeCredentialRequest, MakeCredentialResponse};
pub use commands::{CommandCode, Ctap2Request};
pub use cose::CoseKey;
pub use ctap1::{Ctap1Error, StatusWord};
pub use status::{Result, StatusCode};
pub use types::{
    AuthenticatorOptions, AuthenticatorTransport, CoseAlgorithm, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RelyingParty, User,
};

//! CTAP2 / CTAP1 protocol driver
//!
//! Turns a request into authenticator commands on an open
//! [`CtapConnection`], choosing between CTAP2 and U2F from the negotiated
//! capabilities and falling back where older authenticators need it.
//!
//! The driver is blocking; handlers run it on `spawn_blocking`.

use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use fido_client_crypto::{rp_id_hash, sha256};
use fido_client_ctap::auth_data::{AttestedCredentialData, ZERO_AAGUID, flags};
use fido_client_ctap::cbor::{self, Value};
use fido_client_ctap::ctap1::{
    AuthenticateControl, AuthenticateRequest, AuthenticateResponse, RegisterRequest,
    RegisterResponse,
};
use fido_client_ctap::{
    AttestationObject, AuthenticatorData, AuthenticatorOptions, CoseKey, GetAssertionRequest,
    GetAssertionResponse, MakeCredentialRequest, MakeCredentialResponse,
    PublicKeyCredentialDescriptor, StatusCode,
};
use fido_client_transport::{Capabilities, CtapConnection, Error as TransportError};
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{RequestContext, Status, Transport};
use crate::request::{
    AttestationPreference, RegisterOptions, RequestOptions, ResidentKeyRequirement, SignOptions,
    UserVerificationRequirement,
};
use crate::response::{AssertionResponse, AttestationResponse, AuthenticatorResponse};

/// U2F "conditions not satisfied": the authenticator waits for a touch
const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
const SW_WRONG_DATA: u16 = 0x6A80;

/// Attestation statement of the "fido-u2f" format
#[derive(Serialize)]
struct FidoU2fStatement<'a> {
    #[serde(with = "serde_bytes")]
    sig: &'a [u8],
    x5c: [&'a serde_bytes::Bytes; 1],
}

/// One request on one open connection
pub struct Session<'a> {
    conn: &'a mut dyn CtapConnection,
    context: &'a RequestContext,
    config: &'a ClientConfig,
    transport: Transport,
    deadline: Instant,
}

impl<'a> Session<'a> {
    pub fn new(
        conn: &'a mut dyn CtapConnection,
        context: &'a RequestContext,
        config: &'a ClientConfig,
        transport: Transport,
    ) -> Self {
        Self {
            conn,
            context,
            config,
            transport,
            deadline: Instant::now() + context.timeout,
        }
    }

    pub fn run(&mut self) -> Result<AuthenticatorResponse> {
        self.context.cancel.check()?;
        tracing::debug!(
            transport = %self.transport,
            capabilities = ?self.conn.capabilities(),
            "Running request"
        );

        let options = self.context.options.clone();
        match options.as_ref() {
            RequestOptions::Register(register) => Ok(self.register(register)?.into()),
            RequestOptions::Sign(sign) => Ok(self.sign(sign)?.into()),
        }
    }

    fn client_data_hash(&self) -> [u8; 32] {
        self.context.client_data.hash
    }

    fn has(&self, capability: Capabilities) -> bool {
        self.conn.has(capability)
    }

    /// Built-in user verification, as reported by GetInfo
    fn uv_capable(&self) -> bool {
        self.conn
            .authenticator_info()
            .is_some_and(|info| info.uv_supported())
    }

    fn resolve_user_verification(&self, requirement: UserVerificationRequirement) -> Result<bool> {
        match requirement {
            UserVerificationRequirement::Required if !self.uv_capable() => {
                tracing::info!("User verification required but not available");
                Err(Error::NotSupported)
            }
            UserVerificationRequirement::Required => Ok(true),
            UserVerificationRequirement::Preferred => Ok(self.uv_capable()),
            UserVerificationRequirement::Discouraged => Ok(false),
        }
    }

    fn resolve_resident_key(&self, requirement: ResidentKeyRequirement) -> bool {
        match requirement {
            ResidentKeyRequirement::Required => true,
            ResidentKeyRequirement::Preferred => self
                .conn
                .authenticator_info()
                .is_some_and(|info| info.resident_keys_supported()),
            ResidentKeyRequirement::Discouraged => false,
        }
    }

    fn register(&mut self, options: &RegisterOptions) -> Result<AttestationResponse> {
        let rk = self.resolve_resident_key(options.authenticator_selection.resident_key);
        let ctap1 = self.has(Capabilities::CTAP1);
        let ctap2 = self.has(Capabilities::CTAP2);

        if rk && !ctap2 {
            tracing::info!("Resident key required but authenticator lacks CTAP2");
            return Err(Error::NotSupported);
        }

        if !ctap2 || (self.config.prefer_ctap1 && ctap1 && !rk) {
            if !ctap1 {
                return Err(Error::NotSupported);
            }
            return self.ctap1_register(options);
        }

        match self.ctap2_register(options, rk) {
            Err(Error::Ctap2Status(status @ (StatusCode::UnsupportedAlgorithm | StatusCode::InvalidCommand)))
                if ctap1 && !rk =>
            {
                tracing::info!(%status, "MakeCredential rejected, falling back to CTAP1");
                self.ctap1_register(options)
            }
            result => result,
        }
    }

    fn ctap2_register(&mut self, options: &RegisterOptions, rk: bool) -> Result<AttestationResponse> {
        let uv = self.resolve_user_verification(options.authenticator_selection.user_verification)?;

        let mut flags = AuthenticatorOptions::new();
        if rk {
            flags = flags.with_rk(true);
        }
        if uv {
            flags = flags.with_uv(true);
        }

        let mut request = MakeCredentialRequest::new(
            self.client_data_hash(),
            options.rp.clone(),
            options.user.clone(),
        )
        .with_params(options.parameters.clone())
        .with_exclude_list(options.exclude_list.clone())
        .with_options(flags);
        if let Some(app_id) = &options.app_id {
            request = request.with_extensions(text_extension("appidExclude", app_id)?);
        }

        self.context.report(self.transport, Status::WaitingForUser);
        let payload = self.conn.run_ctap2(&request.to_request()?)?;
        let response = MakeCredentialResponse::decode(&payload)?;

        let credential_id = response
            .authenticator_data()?
            .credential_id()
            .map(<[u8]>::to_vec)
            .ok_or(Error::Data)?;

        let attestation = if options.attestation == AttestationPreference::None {
            AttestationObject::none(response.auth_data)
        } else {
            response.into_attestation_object()
        };

        tracing::info!(transport = %self.transport, "CTAP2 registration complete");
        self.attestation_response(credential_id, &attestation)
    }

    fn ctap1_register(&mut self, options: &RegisterOptions) -> Result<AttestationResponse> {
        if !options.allows_es256() {
            return Err(Error::NotSupported);
        }

        let challenge = self.client_data_hash();
        let application = rp_id_hash(&options.rp.id);
        let app_id_hash = options.app_id.as_deref().map(|id| sha256(id.as_bytes()));

        let mut excluded = false;
        for descriptor in &options.exclude_list {
            if self.ctap1_has_credential(&challenge, &application, descriptor)?
                || match &app_id_hash {
                    Some(hash) => self.ctap1_has_credential(&challenge, hash, descriptor)?,
                    None => false,
                }
            {
                excluded = true;
                break;
            }
        }

        let apdu = RegisterRequest::new(challenge, application).to_apdu();
        let data = self.poll_presence(|conn| conn.run_ctap1(&apdu))?;
        if excluded {
            tracing::info!("Excluded credential present on U2F authenticator");
            return Err(Error::NotAllowed);
        }

        let registration = RegisterResponse::parse(&data)?;
        let public_key = CoseKey::from_sec1(&registration.public_key)?;
        let credential = AttestedCredentialData::new(
            ZERO_AAGUID,
            registration.key_handle.clone(),
            &public_key,
        )?;
        let auth_data = AuthenticatorData::with_rp_id_hash(application, flags::UP, 0)
            .with_attested_credential_data(credential)
            .encode();

        let attestation = if options.attestation == AttestationPreference::None {
            AttestationObject::none(auth_data)
        } else {
            let statement = FidoU2fStatement {
                sig: &registration.signature,
                x5c: [serde_bytes::Bytes::new(&registration.attestation_certificate)],
            };
            AttestationObject::new("fido-u2f", auth_data, cbor::to_value(&statement)?)
        };

        tracing::info!(transport = %self.transport, "CTAP1 registration complete");
        self.attestation_response(registration.key_handle, &attestation)
    }

    fn attestation_response(
        &self,
        credential_id: Vec<u8>,
        attestation: &AttestationObject,
    ) -> Result<AttestationResponse> {
        Ok(AttestationResponse {
            credential_id,
            client_data_json: self.context.client_data.json.clone(),
            attestation_object: attestation.encode()?,
            transports: vec![self.transport.authenticator_transport()],
        })
    }

    fn sign(&mut self, options: &SignOptions) -> Result<AssertionResponse> {
        if self.has(Capabilities::CTAP2) {
            return match self.ctap2_sign(options) {
                Err(err @ Error::Ctap2Status(StatusCode::NoCredentials))
                    if self.has(Capabilities::CTAP1)
                        && !options.allow_list.is_empty()
                        && options.user_verification != UserVerificationRequirement::Required =>
                {
                    tracing::debug!("No CTAP2 credentials, falling back to CTAP1");
                    // An unknown handle over U2F confirms the CTAP2 answer
                    self.ctap1_sign(options).map_err(|ctap1_err| {
                        if is_unknown_handle(&ctap1_err) { err } else { ctap1_err }
                    })
                }
                result => result,
            };
        }

        if self.has(Capabilities::CTAP1) {
            if options.allow_list.is_empty() {
                // U2F has no discoverable credentials
                return Err(Error::NotSupported);
            }
            return self.ctap1_sign(options);
        }

        Err(Error::NotSupported)
    }

    fn ctap2_sign(&mut self, options: &SignOptions) -> Result<AssertionResponse> {
        let uv = self.resolve_user_verification(options.user_verification)?;

        let mut flags = AuthenticatorOptions::new();
        if uv {
            flags = flags.with_uv(true);
        }

        let mut request = GetAssertionRequest::new(options.rp_id.clone(), self.client_data_hash())
            .with_allow_list(options.allow_list.clone())
            .with_options(flags);
        if let Some(app_id) = &options.app_id {
            request = request.with_extensions(text_extension("appid", app_id)?);
        }

        self.context.report(self.transport, Status::WaitingForUser);
        let payload = self.conn.run_ctap2(&request.to_request()?)?;
        let response = GetAssertionResponse::decode(&payload)?;

        let credential_id = response
            .credential_id(&options.allow_list)
            .map(<[u8]>::to_vec)
            .ok_or(Error::Data)?;

        tracing::info!(transport = %self.transport, "CTAP2 assertion complete");
        Ok(AssertionResponse {
            credential_id,
            client_data_json: self.context.client_data.json.clone(),
            authenticator_data: response.auth_data,
            signature: response.signature,
            user_handle: response.user.map(|user| user.id),
        })
    }

    fn ctap1_sign(&mut self, options: &SignOptions) -> Result<AssertionResponse> {
        let application = rp_id_hash(&options.rp_id);
        match (self.ctap1_sign_with(options, &application), &options.app_id) {
            (Err(err), Some(app_id)) if is_unknown_handle(&err) => {
                tracing::debug!(error = %err, "Retrying U2F authentication with AppID");
                self.ctap1_sign_with(options, &sha256(app_id.as_bytes()))
            }
            (result, _) => result,
        }
    }

    fn ctap1_sign_with(
        &mut self,
        options: &SignOptions,
        application: &[u8; 32],
    ) -> Result<AssertionResponse> {
        let challenge = self.client_data_hash();

        let mut chosen = None;
        for descriptor in &options.allow_list {
            if self.ctap1_has_credential(&challenge, application, descriptor)? {
                chosen = Some(descriptor);
                break;
            }
        }
        // Still ask for a touch with an unknown handle
        let descriptor = chosen
            .or_else(|| options.allow_list.first())
            .ok_or(Error::NotAllowed)?;

        let apdu = AuthenticateRequest::new(
            AuthenticateControl::EnforceUserPresence,
            challenge,
            *application,
            descriptor.id.clone(),
        )
        .to_apdu()?;
        let data = self.poll_presence(|conn| conn.run_ctap1(&apdu))?;
        let response = AuthenticateResponse::parse(&data)?;

        let auth_data =
            AuthenticatorData::with_rp_id_hash(*application, response.user_presence, response.counter);

        tracing::info!(transport = %self.transport, "CTAP1 assertion complete");
        Ok(AssertionResponse {
            credential_id: descriptor.id.clone(),
            client_data_json: self.context.client_data.json.clone(),
            authenticator_data: auth_data.encode(),
            signature: response.signature,
            user_handle: None,
        })
    }

    /// Check-only U2F authenticate: does the device own this key handle?
    fn ctap1_has_credential(
        &mut self,
        challenge: &[u8; 32],
        application: &[u8; 32],
        descriptor: &PublicKeyCredentialDescriptor,
    ) -> Result<bool> {
        let Ok(apdu) = AuthenticateRequest::new(
            AuthenticateControl::CheckOnly,
            *challenge,
            *application,
            descriptor.id.clone(),
        )
        .to_apdu() else {
            // Handles over 255 bytes cannot be U2F handles
            return Ok(false);
        };

        match self.conn.run_ctap1(&apdu) {
            Ok(_) => Ok(true),
            Err(TransportError::Ctap1Status(sw)) => Ok(sw == SW_CONDITIONS_NOT_SATISFIED),
            Err(e) => Err(e.into()),
        }
    }

    /// Repeat a U2F command while the authenticator waits for a touch
    fn poll_presence<F>(&mut self, mut attempt: F) -> Result<Vec<u8>>
    where
        F: FnMut(&mut dyn CtapConnection) -> fido_client_transport::Result<Vec<u8>>,
    {
        let mut reported = false;
        loop {
            self.context.cancel.check()?;

            match attempt(&mut *self.conn) {
                Err(TransportError::Ctap1Status(SW_CONDITIONS_NOT_SATISFIED)) => {
                    if !reported {
                        self.context.report(self.transport, Status::WaitingForUser);
                        reported = true;
                    }
                    if Instant::now() >= self.deadline {
                        return Err(Error::Timeout);
                    }
                    thread::sleep(self.config.ctap1_presence_poll_interval);
                }
                result => return Ok(result?),
            }
        }
    }
}

/// U2F "wrong data": the key handle was not issued for this application
fn is_unknown_handle(err: &Error) -> bool {
    matches!(err, Error::Ctap1Status(SW_WRONG_DATA))
}

fn text_extension(name: &str, value: &str) -> Result<Value> {
    let mut map = BTreeMap::new();
    map.insert(name, value);
    Ok(cbor::to_value(&map)?)
}

/// Run one request on `conn`, closing it on every exit path
pub fn run_and_close(
    conn: &mut dyn CtapConnection,
    context: &RequestContext,
    config: &ClientConfig,
    transport: Transport,
) -> Result<AuthenticatorResponse> {
    let result = Session::new(&mut *conn, context, config, transport).run();
    conn.close();

    match result {
        // A command interrupted by cancellation reports the cancellation
        Err(err) if context.cancel.is_cancelled() => {
            tracing::debug!(error = %err, "Request finished after cancellation");
            Err(Error::Cancelled)
        }
        Err(err) => {
            tracing::warn!(%transport, error = %err, "Request failed");
            Err(err)
        }
        Ok(response) if context.cancel.is_cancelled() => {
            drop(response);
            Err(Error::Cancelled)
        }
        ok => ok,
    }
}

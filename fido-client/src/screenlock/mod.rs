//! Platform authenticator behind the device lock
//!
//! Credentials are P-256 keys in a [`CredentialStore`]; every use is gated by
//! a [`UserPrompt`]. Attestation is always "none" with a zero AAGUID.

pub mod credential;
pub mod prompt;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use fido_client_ctap::auth_data::{AttestedCredentialData, ZERO_AAGUID, flags};
use fido_client_ctap::{AttestationObject, AuthenticatorData, CoseKey, PublicKeyCredentialDescriptor};

use crate::error::{Error, Result};
use crate::handler::{RequestContext, Status, Transport, TransportHandler};
use crate::request::{AttestationPreference, RegisterOptions, RequestOptions, SignOptions};
use crate::response::{AssertionResponse, AttestationResponse, AuthenticatorResponse};

pub use credential::{CredentialId, KeyHandle};
pub use prompt::{PromptOutcome, PromptPurpose, PromptRequest, UserPrompt};
pub use store::{CredentialStore, MemoryCredentialStore, SignatureHandle, StoredCredential};

/// Deletes a freshly created key unless the registration commits it
struct PendingKey<'a> {
    store: &'a dyn CredentialStore,
    rp_id: &'a str,
    key_handle: KeyHandle,
    committed: bool,
}

impl PendingKey<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingKey<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.delete(self.rp_id, &self.key_handle);
            tracing::debug!(rp_id = self.rp_id, "Discarded uncommitted platform key");
        }
    }
}

pub struct ScreenLockHandler {
    store: Arc<dyn CredentialStore>,
    prompt: Arc<dyn UserPrompt>,
}

impl ScreenLockHandler {
    pub fn new(store: Arc<dyn CredentialStore>, prompt: Arc<dyn UserPrompt>) -> Self {
        Self { store, prompt }
    }

    /// Stored credentials matching an allow-list; all of the rp's keys when it is empty
    fn candidates(
        &self,
        rp_id: &str,
        allow_list: &[PublicKeyCredentialDescriptor],
    ) -> Vec<StoredCredential> {
        if allow_list.is_empty() {
            return self.store.list(rp_id);
        }

        allow_list
            .iter()
            .filter_map(|descriptor| self.lookup(rp_id, &descriptor.id))
            .collect()
    }

    fn lookup(&self, rp_id: &str, credential_id: &[u8]) -> Option<StoredCredential> {
        let key_handle = CredentialId::decode_key_handle(credential_id).ok()?;
        self.store
            .get(rp_id, &key_handle)
            .filter(|stored| stored.id.matches(credential_id))
    }

    async fn ask(&self, context: &RequestContext, request: PromptRequest<'_>) -> Result<PromptOutcome> {
        context.report(Transport::ScreenLock, Status::WaitingForUser);
        tokio::select! {
            outcome = self.prompt.prompt(request) => Ok(outcome),
            _ = context.cancel.cancelled() => {
                self.prompt.dismiss();
                Err(Error::Cancelled)
            }
        }
    }

    async fn register(
        &self,
        context: &RequestContext,
        options: &RegisterOptions,
    ) -> Result<AttestationResponse> {
        let rp_id = options.rp.id.as_str();

        if options.attestation != AttestationPreference::None {
            tracing::info!(
                attestation = options.attestation.as_str(),
                "Platform authenticator only offers none attestation"
            );
            return Err(Error::NotSupported);
        }

        if options
            .exclude_list
            .iter()
            .any(|descriptor| self.lookup(rp_id, &descriptor.id).is_some())
        {
            tracing::info!(rp_id, "Excluded credential already registered");
            return Err(Error::NotAllowed);
        }

        let id = self.store.create_key(rp_id, Some(&options.user))?;
        let pending = PendingKey {
            store: self.store.as_ref(),
            rp_id,
            key_handle: id.key_handle,
            committed: false,
        };

        let handle = self.store.signature_handle(rp_id, &id.key_handle)?;
        let request = PromptRequest {
            purpose: PromptPurpose::Register,
            rp_id,
            handle: Some(&handle),
        };
        match self.ask(context, request).await? {
            PromptOutcome::Confirmed => {}
            PromptOutcome::Cancelled => return Err(Error::Cancelled),
            PromptOutcome::Failed => return Err(Error::NotAllowed),
        }

        let public_key = CoseKey::from_sec1(&id.public_key)?;
        let credential_id = id.encode();
        let credential =
            AttestedCredentialData::new(ZERO_AAGUID, credential_id.clone(), &public_key)?;
        let auth_data = AuthenticatorData::new(rp_id, flags::UP | flags::UV, 0)
            .with_attested_credential_data(credential);
        let attestation = AttestationObject::none(auth_data.encode());

        pending.commit();
        tracing::info!(rp_id, "Platform credential registered");

        Ok(AttestationResponse {
            credential_id,
            client_data_json: context.client_data.json.clone(),
            attestation_object: attestation.encode()?,
            transports: vec![Transport::ScreenLock.authenticator_transport()],
        })
    }

    async fn sign(&self, context: &RequestContext, options: &SignOptions) -> Result<AssertionResponse> {
        let rp_id = options.rp_id.as_str();
        let candidates = self.candidates(rp_id, &options.allow_list);

        let Some(chosen) = candidates.into_iter().next() else {
            // Prompt anyway so probing for credentials costs a user action
            let request = PromptRequest {
                purpose: PromptPurpose::Sign,
                rp_id,
                handle: None,
            };
            self.ask(context, request).await?;
            tracing::info!(rp_id, "No platform credential for sign request");
            return Err(Error::NotAllowed);
        };

        let handle = self.store.signature_handle(rp_id, &chosen.id.key_handle)?;
        let request = PromptRequest {
            purpose: PromptPurpose::Sign,
            rp_id,
            handle: Some(&handle),
        };
        match self.ask(context, request).await? {
            PromptOutcome::Confirmed => {}
            PromptOutcome::Cancelled => return Err(Error::Cancelled),
            PromptOutcome::Failed => return Err(Error::NotAllowed),
        }

        let authenticator_data = AuthenticatorData::new(rp_id, flags::UP | flags::UV, 0).encode();
        let mut signed = authenticator_data.clone();
        signed.extend_from_slice(&context.client_data.hash);
        let signature = handle.sign(&signed)?;

        tracing::info!(rp_id, "Platform assertion signed");
        Ok(AssertionResponse {
            credential_id: chosen.id.encode(),
            client_data_json: context.client_data.json.clone(),
            authenticator_data,
            signature,
            user_handle: chosen.user.map(|user| user.id),
        })
    }

    /// Stored credentials of a relying party
    pub fn credentials(&self, rp_id: &str) -> Vec<StoredCredential> {
        self.store.list(rp_id)
    }

    /// Delete a credential after the user confirms; returns whether it was removed
    pub async fn delete_credential(&self, rp_id: &str, credential_id: &[u8]) -> Result<bool> {
        let Some(stored) = self.lookup(rp_id, credential_id) else {
            return Ok(false);
        };

        let request = PromptRequest {
            purpose: PromptPurpose::Delete,
            rp_id,
            handle: None,
        };
        match self.prompt.prompt(request).await {
            PromptOutcome::Confirmed => Ok(self.store.delete(rp_id, &stored.id.key_handle)),
            PromptOutcome::Cancelled => Err(Error::Cancelled),
            PromptOutcome::Failed => Err(Error::NotAllowed),
        }
    }
}

#[async_trait]
impl TransportHandler for ScreenLockHandler {
    fn transport(&self) -> Transport {
        Transport::ScreenLock
    }

    fn is_supported(&self, _options: &RequestOptions) -> bool {
        self.prompt.is_device_secure()
    }

    fn can_answer_instantly(&self, options: &RequestOptions) -> bool {
        match options {
            RequestOptions::Sign(sign) => !self.candidates(&sign.rp_id, &sign.allow_list).is_empty(),
            RequestOptions::Register(_) => false,
        }
    }

    async fn start(&self, context: &RequestContext) -> Result<AuthenticatorResponse> {
        match context.options.as_ref() {
            RequestOptions::Register(options) => Ok(self.register(context, options).await?.into()),
            RequestOptions::Sign(options) => Ok(self.sign(context, options).await?.into()),
        }
    }

    fn cancel(&self) {
        self.prompt.dismiss();
    }
}

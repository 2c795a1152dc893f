//! Platform authenticator through the orchestrator
//!
//! Registration needs an explicit transport pick; a sign request with a
//! matching local credential runs without one.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{CountingPrompt, RP_ID, register_options, sign_options};
use fido_client::screenlock::{CredentialStore, MemoryCredentialStore, PromptOutcome, PromptPurpose};
use fido_client::{
    AttestationPreference, ClientConfig, Error, Orchestrator, PublicKeyCredentialDescriptor,
    RequestOptions, ScreenLockHandler, State, Transport,
};
use fido_client_crypto::{ecdsa, rp_id_hash, sha256};
use fido_client_ctap::auth_data::{ZERO_AAGUID, flags};

struct Setup {
    orchestrator: Arc<Orchestrator>,
    store: Arc<MemoryCredentialStore>,
    prompt: Arc<CountingPrompt>,
}

fn setup(prompt: Arc<CountingPrompt>) -> Setup {
    let store = Arc::new(MemoryCredentialStore::new());
    let handler = ScreenLockHandler::new(store.clone(), prompt.clone());
    let orchestrator =
        Arc::new(Orchestrator::new(ClientConfig::default()).with_handler(Arc::new(handler)));
    Setup {
        orchestrator,
        store,
        prompt,
    }
}

/// Start a request and pick the screen lock once selection is offered
async fn run_selected(
    orchestrator: &Arc<Orchestrator>,
    options: impl Into<RequestOptions>,
) -> fido_client::Result<fido_client::AuthenticatorResponse> {
    let options = options.into();
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.start(options).await })
    };

    loop {
        match orchestrator.state() {
            State::AwaitingSelection(_) => {
                orchestrator.select(Transport::ScreenLock)?;
                break;
            }
            state if task.is_finished() => panic!("request ended before selection: {:?}", state),
            _ => tokio::task::yield_now().await,
        }
    }
    task.await.unwrap()
}

#[tokio::test]
async fn test_register_binds_relying_party() {
    let s = setup(CountingPrompt::new());

    let response = run_selected(&s.orchestrator, register_options()).await.unwrap();
    let attestation = response.as_attestation().unwrap();
    let auth_data = attestation.authenticator_data().unwrap();

    assert_eq!(auth_data.rp_id_hash, sha256(b"example.com"));
    assert_eq!(auth_data.rp_id_hash, rp_id_hash(RP_ID));
    assert_eq!(auth_data.flags, flags::UP | flags::UV | flags::AT);
    assert_eq!(auth_data.sign_count, 0);
    assert_eq!(
        auth_data.attested_credential_data.unwrap().aaguid,
        ZERO_AAGUID
    );
    assert!(attestation.attestation().unwrap().is_none_format());
    assert_eq!(s.store.len(), 1);
    assert_eq!(s.orchestrator.state(), State::Completed);
}

#[tokio::test]
async fn test_excluded_credential_fails_before_key_generation() {
    let s = setup(CountingPrompt::new());
    let first = run_selected(&s.orchestrator, register_options()).await.unwrap();
    let prompts = s.prompt.count();

    let options = register_options().with_exclude_list(vec![PublicKeyCredentialDescriptor::new(
        first.credential_id().to_vec(),
    )]);
    let err = run_selected(&s.orchestrator, options).await.unwrap_err();

    assert_eq!(err, Error::NotAllowed);
    assert_eq!(s.store.len(), 1);
    assert_eq!(s.prompt.count(), prompts);
    assert_eq!(s.orchestrator.state(), State::Failed);
}

#[tokio::test]
async fn test_attestation_request_not_supported() {
    let s = setup(CountingPrompt::new());

    let options = register_options().with_attestation(AttestationPreference::Direct);
    let err = run_selected(&s.orchestrator, options).await.unwrap_err();

    assert_eq!(err, Error::NotSupported);
    assert!(s.store.is_empty());
}

#[tokio::test]
async fn test_sign_with_local_credential_skips_selection() {
    let s = setup(CountingPrompt::new());
    let registered = run_selected(&s.orchestrator, register_options()).await.unwrap();
    let credential_id = registered.credential_id().to_vec();

    let options = sign_options()
        .with_allow_list(vec![PublicKeyCredentialDescriptor::new(credential_id.clone())]);
    let response = s.orchestrator.start(options).await.unwrap();
    let assertion = response.as_assertion().unwrap();

    assert_eq!(assertion.credential_id, credential_id);
    assert_eq!(assertion.user_handle, Some(vec![0xAA; 16]));

    let auth_data = assertion.authenticator_data().unwrap();
    assert_eq!(auth_data.rp_id_hash, rp_id_hash(RP_ID));
    assert_eq!(auth_data.flags, flags::UP | flags::UV);

    let client_data_hash = sha256(&assertion.client_data_json);
    let public_key = s.store.list(RP_ID)[0].id.public_key;
    ecdsa::verify(
        &public_key,
        &assertion.signed_data(&client_data_hash),
        &assertion.signature,
    )
    .unwrap();

    assert_eq!(
        s.prompt.prompts.lock().unwrap().as_slice(),
        &[PromptPurpose::Register, PromptPurpose::Sign]
    );
}

#[tokio::test]
async fn test_prompt_failure_is_not_allowed() {
    let s = setup(CountingPrompt::new());
    run_selected(&s.orchestrator, register_options()).await.unwrap();

    s.prompt.push(PromptOutcome::Failed);
    let err = s.orchestrator.start(sign_options()).await.unwrap_err();
    assert_eq!(err, Error::NotAllowed);
}

#[tokio::test]
async fn test_cancel_pending_prompt_discards_key() {
    let s = setup(CountingPrompt::hanging());

    let task = {
        let orchestrator = s.orchestrator.clone();
        tokio::spawn(async move { orchestrator.start(register_options()).await })
    };
    while !matches!(s.orchestrator.state(), State::AwaitingSelection(_)) {
        tokio::task::yield_now().await;
    }
    s.orchestrator.select(Transport::ScreenLock).unwrap();
    while s.prompt.count() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(s.store.len(), 1);

    assert!(s.orchestrator.cancel());
    assert_eq!(task.await.unwrap(), Err(Error::Cancelled));

    assert!(s.prompt.dismissed.load(Ordering::SeqCst));
    assert!(s.store.is_empty());
    assert_eq!(s.orchestrator.state(), State::Cancelled);
    assert_eq!(s.orchestrator.open_sessions(), 0);
}

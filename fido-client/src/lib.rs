#![warn(unused_extern_crates)]

//! # fido-client
//!
//! A FIDO2/WebAuthn client: it takes a registration or sign request from a
//! relying party, finds an authenticator over USB, NFC, BLE hybrid or the
//! local screen lock, speaks CTAP2 (falling back to CTAP1/U2F) and returns a
//! WebAuthn-shaped response.
//!
//! ## Architecture
//!
//! - **Orchestrator**: transport selection, single-flight request lifecycle, cancellation
//! - **Handlers**: one [`TransportHandler`] per transport, behind platform boundary traits
//! - **Protocol**: CTAP2/CTAP1 driver shared by every roaming transport
//! - **Screen lock**: platform authenticator over a [`CredentialStore`] and a [`UserPrompt`]
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> Result<(), fido_client::Error> {
//! use std::sync::Arc;
//!
//! use fido_client::screenlock::{MemoryCredentialStore, ScreenLockHandler, UserPrompt};
//! use fido_client::{ClientConfig, Orchestrator, SignOptions};
//!
//! # fn prompt() -> Arc<dyn UserPrompt> { unimplemented!() }
//! let config = ClientConfig::default();
//! let screen_lock = ScreenLockHandler::new(Arc::new(MemoryCredentialStore::new()), prompt());
//! let orchestrator = Orchestrator::new(config).with_handler(Arc::new(screen_lock));
//!
//! let response = orchestrator
//!     .start(SignOptions::new("example.com", vec![0; 32]))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod protocol;
pub mod request;
pub mod response;
pub mod screenlock;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use handler::{IgnoreStatus, RequestContext, Status, StatusSink, Transport, TransportHandler};
pub use orchestrator::{Orchestrator, State};
pub use request::{
    AttestationPreference, AuthenticatorSelection, RegisterOptions, RequestOptions,
    ResidentKeyRequirement, SignOptions, UserVerificationRequirement,
};
pub use response::{AssertionResponse, AttestationResponse, AuthenticatorResponse};
pub use screenlock::{CredentialStore, ScreenLockHandler, UserPrompt};
pub use transport::{HidEnumerator, HybridHandler, NfcHandler, QrDisplay, TagReader, UsbHandler};

pub use fido_client_ctap::{
    PublicKeyCredentialDescriptor, PublicKeyCredentialParameters, RelyingParty, User,
};
pub use fido_client_transport::CancelToken;

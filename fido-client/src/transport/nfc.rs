//! NFC handler
//!
//! Waits for a tag to be tapped, then runs the request over ISO-DEP. A tag
//! pulled away mid-request fails the link; the orchestrator asks for a fresh
//! tap and retries.

use std::sync::Arc;

use async_trait::async_trait;
use fido_client_transport::{CancelToken, IsoDep, NfcConnection};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{RequestContext, Status, Transport, TransportHandler};
use crate::request::RequestOptions;
use crate::response::AuthenticatorResponse;
use crate::transport::{ActiveLink, run_blocking};

/// Platform NFC reader
#[async_trait]
pub trait TagReader: Send + Sync {
    /// Whether an NFC adapter is present and enabled
    fn is_available(&self) -> bool;

    /// Resolve with the next ISO-DEP tag in the field
    async fn next_tag(&self, cancel: &CancelToken) -> Result<Box<dyn IsoDep>>;
}

pub struct NfcHandler {
    reader: Arc<dyn TagReader>,
    config: ClientConfig,
    link: Arc<ActiveLink>,
}

impl NfcHandler {
    pub fn new(reader: Arc<dyn TagReader>, config: ClientConfig) -> Self {
        Self {
            reader,
            config,
            link: Arc::default(),
        }
    }
}

#[async_trait]
impl TransportHandler for NfcHandler {
    fn transport(&self) -> Transport {
        Transport::Nfc
    }

    fn is_supported(&self, _options: &RequestOptions) -> bool {
        self.reader.is_available()
    }

    async fn start(&self, context: &RequestContext) -> Result<AuthenticatorResponse> {
        context.report(Transport::Nfc, Status::WaitingForDevice);

        let tag = tokio::select! {
            tag = self.reader.next_tag(&context.cancel) => tag?,
            _ = context.cancel.cancelled() => return Err(Error::Cancelled),
        };
        tracing::debug!("NFC tag discovered");
        // SELECT can block too
        self.link.attach(tag.interrupt_handle());

        let limits = self.config.nfc_limits();
        run_blocking(context, &self.config, Transport::Nfc, &self.link, move || {
            NfcConnection::open(tag, limits)
        })
        .await
    }

    fn cancel(&self) {
        if self.link.interrupt() {
            tracing::debug!("Released NFC tag");
        }
    }

    fn retries_on_failure(&self) -> bool {
        true
    }
}

//! Transport handler abstraction
//!
//! The orchestrator drives a closed set of transports, each behind a
//! [`TransportHandler`]. A handler owns the platform side of its transport
//! (device enumeration, tag discovery, BLE, the local prompt) and turns one
//! [`RequestContext`] into one [`AuthenticatorResponse`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fido_client_ctap::AuthenticatorTransport;
use fido_client_transport::CancelToken;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::request::{CollectedClientData, RequestOptions};
use crate::response::AuthenticatorResponse;

/// Transports a request can be served over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Usb,
    Nfc,
    /// Hybrid (caBLE) through BLE discovery
    Ble,
    /// Local platform authenticator behind the device lock
    ScreenLock,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Nfc => "nfc",
            Self::Ble => "ble",
            Self::ScreenLock => "screen-lock",
        }
    }

    /// Transport hint reported with a new credential
    pub fn authenticator_transport(&self) -> AuthenticatorTransport {
        match self {
            Self::Usb => AuthenticatorTransport::Usb,
            Self::Nfc => AuthenticatorTransport::Nfc,
            Self::Ble => AuthenticatorTransport::Hybrid,
            Self::ScreenLock => AuthenticatorTransport::Internal,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reported to the caller while a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    WaitingForDevice,
    WaitingForUser,
    WaitingForSelection,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForDevice => "waiting-for-device",
            Self::WaitingForUser => "waiting-for-user",
            Self::WaitingForSelection => "waiting-for-selection",
        }
    }
}

/// Receiver of status updates
///
/// `transport` is `None` for updates that concern no single transport.
pub trait StatusSink: Send + Sync {
    fn status_changed(&self, transport: Option<Transport>, status: Status);
}

impl<F> StatusSink for F
where
    F: Fn(Option<Transport>, Status) + Send + Sync,
{
    fn status_changed(&self, transport: Option<Transport>, status: Status) {
        self(transport, status)
    }
}

/// Sink that drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreStatus;

impl StatusSink for IgnoreStatus {
    fn status_changed(&self, _transport: Option<Transport>, _status: Status) {}
}

/// Everything a handler needs to serve one request
#[derive(Clone)]
pub struct RequestContext {
    pub options: Arc<RequestOptions>,
    pub client_data: CollectedClientData,
    pub cancel: CancelToken,
    pub status: Arc<dyn StatusSink>,
    /// Bound on the whole request
    pub timeout: Duration,
}

impl RequestContext {
    pub fn new(
        options: RequestOptions,
        config: &ClientConfig,
        cancel: CancelToken,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let client_data = CollectedClientData::collect(&options, config)?;
        let timeout = config.timeout_for(options.timeout());
        Ok(Self {
            options: Arc::new(options),
            client_data,
            cancel,
            status,
            timeout,
        })
    }

    pub fn report(&self, transport: Transport, status: Status) {
        self.status.status_changed(Some(transport), status);
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("rp_id", &self.options.rp_id())
            .field("cancel", &self.cancel)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One transport the orchestrator can route a request to
#[async_trait]
pub trait TransportHandler: Send + Sync {
    fn transport(&self) -> Transport;

    /// Whether the platform can serve `options` over this transport at all
    fn is_supported(&self, options: &RequestOptions) -> bool;

    /// Whether this handler can answer without the user picking a transport
    fn can_answer_instantly(&self, _options: &RequestOptions) -> bool {
        false
    }

    /// Serve one request
    ///
    /// Implementations observe `context.cancel` at every suspension point and
    /// release their session before returning.
    async fn start(&self, context: &RequestContext) -> Result<AuthenticatorResponse>;

    /// Abort the running request; called synchronously by the orchestrator
    fn cancel(&self);

    /// Whether a failed attempt should wait for a fresh device and retry
    fn retries_on_failure(&self) -> bool {
        false
    }
}

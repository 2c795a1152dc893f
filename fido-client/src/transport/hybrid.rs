//! BLE hybrid handler
//!
//! Client side: show a QR code, scan for the phone's EID advert, open the
//! tunnel through a [`TunnelConnector`] and run the request over it.
//! Authenticator side: [`advertise_for_qr`] answers a scanned QR code.

use std::sync::Arc;

use async_trait::async_trait;
use fido_client_crypto::KeyPair;
use fido_client_crypto::eid::EidPlaintext;
use fido_client_transport::hybrid::{self, HandshakeData, RequestType, TunnelConnector};
use fido_client_transport::{BlePlatform, CancelToken, CtapConnection};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{RequestContext, Status, Transport, TransportHandler};
use crate::protocol::run_and_close;
use crate::request::RequestOptions;
use crate::response::AuthenticatorResponse;

/// Shows the hybrid QR code to the user
pub trait QrDisplay: Send + Sync {
    fn show(&self, qr: &str);

    fn hide(&self);
}

struct QrGuard<'a>(&'a dyn QrDisplay);

impl Drop for QrGuard<'_> {
    fn drop(&mut self) {
        self.0.hide();
    }
}

pub struct HybridHandler {
    platform: Arc<dyn BlePlatform>,
    connector: Arc<dyn TunnelConnector>,
    display: Arc<dyn QrDisplay>,
    config: ClientConfig,
}

impl HybridHandler {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        connector: Arc<dyn TunnelConnector>,
        display: Arc<dyn QrDisplay>,
        config: ClientConfig,
    ) -> Self {
        Self {
            platform,
            connector,
            display,
            config,
        }
    }

    async fn connect(&self, context: &RequestContext) -> Result<Box<dyn CtapConnection>> {
        let request_type = match context.options.as_ref() {
            RequestOptions::Register(_) => RequestType::MakeCredential,
            RequestOptions::Sign(_) => RequestType::GetAssertion,
        };
        let identity = KeyPair::generate();
        let handshake = HandshakeData::generate(&identity, request_type)?;

        self.display.show(&handshake.to_qr_string()?);
        let _qr = QrGuard(self.display.as_ref());
        context.report(Transport::Ble, Status::WaitingForUser);

        let advert = hybrid::discover(
            self.platform.as_ref(),
            &handshake,
            self.config.ble_scan_timeout,
            &context.cancel,
        )
        .await?;

        tokio::select! {
            conn = self.connector.connect(&handshake, &advert) => Ok(conn?),
            _ = context.cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[async_trait]
impl TransportHandler for HybridHandler {
    fn transport(&self) -> Transport {
        Transport::Ble
    }

    fn is_supported(&self, _options: &RequestOptions) -> bool {
        self.platform.has_adapter()
    }

    async fn start(&self, context: &RequestContext) -> Result<AuthenticatorResponse> {
        let mut conn = self.connect(context).await?;

        let ctx = context.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || run_and_close(conn.as_mut(), &ctx, &config, Transport::Ble))
            .await?
    }

    fn cancel(&self) {
        self.display.hide();
    }
}

/// Advertise an EID answering a scanned hybrid QR code
///
/// Returns the advertised plaintext once the advertising window ends.
pub async fn advertise_for_qr(
    platform: &dyn BlePlatform,
    qr: &str,
    routing_id: [u8; 3],
    tunnel_server_id: u16,
    config: &ClientConfig,
    cancel: &CancelToken,
) -> Result<EidPlaintext> {
    let handshake = HandshakeData::from_qr_string(qr).map_err(|_| Error::Data)?;
    Ok(hybrid::advertise(
        platform,
        &handshake,
        routing_id,
        tunnel_server_id,
        config.ble_advertise_duration,
        cancel,
    )
    .await?)
}

//! USB HID handler

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fido_client_transport::{HidDevice, UsbConnection};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{RequestContext, Status, Transport, TransportHandler};
use crate::request::RequestOptions;
use crate::response::AuthenticatorResponse;
use crate::transport::{ActiveLink, run_blocking};

/// Interval between device enumerations while none is attached
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Source of attached FIDO HID devices
pub trait HidEnumerator: Send + Sync {
    /// Whether the platform has a USB host stack at all
    fn is_available(&self) -> bool {
        true
    }

    /// Open every attached FIDO device, first match first
    fn devices(&self) -> Result<Vec<Box<dyn HidDevice>>>;
}

pub struct UsbHandler {
    enumerator: Arc<dyn HidEnumerator>,
    config: ClientConfig,
    link: Arc<ActiveLink>,
}

impl UsbHandler {
    pub fn new(enumerator: Arc<dyn HidEnumerator>, config: ClientConfig) -> Self {
        Self {
            enumerator,
            config,
            link: Arc::default(),
        }
    }

    async fn wait_for_device(&self, context: &RequestContext) -> Result<Box<dyn HidDevice>> {
        let mut reported = false;
        loop {
            context.cancel.check()?;
            if let Some(device) = self.enumerator.devices()?.into_iter().next() {
                return Ok(device);
            }

            if !reported {
                context.report(Transport::Usb, Status::WaitingForDevice);
                reported = true;
            }
            tokio::select! {
                _ = tokio::time::sleep(DEVICE_POLL_INTERVAL) => {}
                _ = context.cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}

#[async_trait]
impl TransportHandler for UsbHandler {
    fn transport(&self) -> Transport {
        Transport::Usb
    }

    fn is_supported(&self, _options: &RequestOptions) -> bool {
        self.enumerator.is_available()
    }

    async fn start(&self, context: &RequestContext) -> Result<AuthenticatorResponse> {
        let device = self.wait_for_device(context).await?;
        let timeouts = self.config.usb_timeouts(context.timeout);
        let cancel = context.cancel.clone();

        run_blocking(context, &self.config, Transport::Usb, &self.link, move || {
            UsbConnection::open(device, timeouts, cancel)
        })
        .await
    }

    /// Sends CTAPHID_CANCEL right away when the device has a second handle;
    /// otherwise the session notices the cancel token on its next read.
    fn cancel(&self) {
        if self.link.interrupt() {
            tracing::debug!("Sent cancel to USB session");
        }
    }
}

#[cfg(feature = "usb")]
mod hidapi_backend {
    use std::sync::Mutex;

    use fido_client_transport::{HidapiDevice, enumerate_devices, init_usb};

    use super::*;

    /// [`HidEnumerator`] over hidapi
    pub struct HidapiEnumerator {
        api: Mutex<hidapi::HidApi>,
    }

    impl HidapiEnumerator {
        pub fn new() -> Result<Self> {
            Ok(Self {
                api: Mutex::new(init_usb()?),
            })
        }
    }

    impl HidEnumerator for HidapiEnumerator {
        fn devices(&self) -> Result<Vec<Box<dyn HidDevice>>> {
            let mut api = self.api.lock().map_err(|_| Error::InvalidState)?;
            api.refresh_devices()
                .map_err(|e| Error::Transport(fido_client_transport::Error::IoError(e.to_string())))?;

            let mut devices: Vec<Box<dyn HidDevice>> = Vec::new();
            for info in enumerate_devices(&api) {
                match HidapiDevice::open(&api, &info) {
                    Ok(device) => devices.push(Box::new(device)),
                    Err(e) => tracing::debug!(path = %info.path, error = %e, "Skipping device"),
                }
            }
            Ok(devices)
        }
    }
}

#[cfg(feature = "usb")]
pub use hidapi_backend::HidapiEnumerator;

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fido_client_ctap::commands::encode_response;
    use fido_client_ctap::{AuthenticatorInfo, StatusCode};
    use fido_client_transport::channel::{Assembly, Reassembler};
    use fido_client_transport::ctaphid::{BROADCAST_CID, PACKET_SIZE};
    use fido_client_transport::{CancelToken, Cmd, InitResponse, Message, Packet, ReportWriter};

    use crate::handler::IgnoreStatus;
    use crate::request::SignOptions;

    struct NoDevices {
        calls: AtomicUsize,
    }

    impl HidEnumerator for NoDevices {
        fn devices(&self) -> Result<Vec<Box<dyn HidDevice>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// Device that never answers
    struct SilentDevice;

    impl HidDevice for SilentDevice {
        fn write_report(&mut self, _report: &[u8; PACKET_SIZE]) -> fido_client_transport::Result<()> {
            Ok(())
        }

        fn read_report(
            &mut self,
            _timeout: Duration,
        ) -> fido_client_transport::Result<Option<[u8; PACKET_SIZE]>> {
            Ok(None)
        }
    }

    struct OneDevice;

    impl HidEnumerator for OneDevice {
        fn devices(&self) -> Result<Vec<Box<dyn HidDevice>>> {
            Ok(vec![Box::new(SilentDevice)])
        }
    }

    const CID: u32 = 0x01020304;

    #[derive(Default)]
    struct Parked {
        assembling: Option<Reassembler>,
        outbox: VecDeque<[u8; PACKET_SIZE]>,
        waiting: bool,
        cancels: usize,
    }

    /// CTAP2 device that holds every request until CTAPHID_CANCEL arrives
    #[derive(Clone, Default)]
    struct ParkingDevice(Arc<Mutex<Parked>>);

    impl ParkingDevice {
        fn receive(&self, report: &[u8; PACKET_SIZE]) -> fido_client_transport::Result<()> {
            let packet = Packet::from_bytes(*report);
            let mut state = self.0.lock().unwrap();
            if packet.is_init() {
                state.assembling = Some(Reassembler::new(packet.cid()));
            }
            let Some(reassembler) = state.assembling.as_mut() else {
                return Ok(());
            };
            let Assembly::Complete(request) = reassembler.push(&packet)? else {
                return Ok(());
            };
            state.assembling = None;

            let reply = match request.cmd {
                Cmd::Init => {
                    let init = InitResponse {
                        nonce: request.data[..8].try_into().unwrap(),
                        cid: CID,
                        protocol_version: 2,
                        device_version: (1, 0, 0),
                        capabilities: fido_client_transport::ctaphid::capability::CBOR,
                    };
                    Message::new(BROADCAST_CID, Cmd::Init, init.encode())
                }
                Cmd::Cbor if request.data.first() == Some(&0x04) => {
                    let info = AuthenticatorInfo {
                        versions: vec!["FIDO_2_0".into()],
                        ..Default::default()
                    };
                    let body = encode_response(StatusCode::Success, &info.encode().unwrap());
                    Message::new(CID, Cmd::Cbor, body)
                }
                Cmd::Cbor => {
                    state.waiting = true;
                    return Ok(());
                }
                Cmd::Cancel => {
                    state.cancels += 1;
                    if !std::mem::take(&mut state.waiting) {
                        return Ok(());
                    }
                    Message::new(CID, Cmd::Cbor, vec![StatusCode::KeepaliveCancel.into()])
                }
                _ => return Ok(()),
            };
            for packet in reply.to_packets()? {
                state.outbox.push_back(*packet.as_bytes());
            }
            Ok(())
        }
    }

    impl HidDevice for ParkingDevice {
        fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> fido_client_transport::Result<()> {
            self.receive(report)
        }

        fn read_report(
            &mut self,
            _timeout: Duration,
        ) -> fido_client_transport::Result<Option<[u8; PACKET_SIZE]>> {
            let report = self.0.lock().unwrap().outbox.pop_front();
            if report.is_none() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(report)
        }

        fn report_writer(&self) -> Option<Arc<dyn ReportWriter>> {
            Some(Arc::new(self.clone()))
        }
    }

    impl ReportWriter for ParkingDevice {
        fn write_report(&self, report: &[u8; PACKET_SIZE]) -> fido_client_transport::Result<()> {
            self.receive(report)
        }
    }

    struct Enumerate(ParkingDevice);

    impl HidEnumerator for Enumerate {
        fn devices(&self) -> Result<Vec<Box<dyn HidDevice>>> {
            Ok(vec![Box::new(self.0.clone())])
        }
    }

    fn context(cancel: CancelToken, status: Arc<dyn crate::handler::StatusSink>) -> RequestContext {
        let options = SignOptions::new("example.com", vec![1; 32])
            .with_timeout(Duration::from_millis(50))
            .into();
        RequestContext::new(options, &ClientConfig::default(), cancel, status).unwrap()
    }

    #[tokio::test]
    async fn test_waits_for_device_until_cancelled() {
        let enumerator = Arc::new(NoDevices {
            calls: AtomicUsize::new(0),
        });
        let handler = UsbHandler::new(enumerator.clone(), ClientConfig::default());

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let statuses = statuses.clone();
            move |transport: Option<Transport>, status: Status| {
                statuses.lock().unwrap().push((transport, status));
            }
        };
        let cancel = CancelToken::new();
        let ctx = context(cancel.clone(), Arc::new(sink));

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(DEVICE_POLL_INTERVAL * 2).await;
                cancel.cancel();
            })
        };

        assert_eq!(handler.start(&ctx).await.unwrap_err(), Error::Cancelled);
        canceller.await.unwrap();

        assert!(enumerator.calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[(Some(Transport::Usb), Status::WaitingForDevice)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_reaches_blocked_device() {
        let device = ParkingDevice::default();
        let handler = Arc::new(UsbHandler::new(
            Arc::new(Enumerate(device.clone())),
            ClientConfig::default(),
        ));
        let options = SignOptions::new("example.com", vec![1; 32])
            .with_timeout(Duration::from_secs(10))
            .into();
        // The token stays untouched: only the handler's cancel reaches the device
        let ctx = RequestContext::new(
            options,
            &ClientConfig::default(),
            CancelToken::new(),
            Arc::new(IgnoreStatus),
        )
        .unwrap();

        let request = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.start(&ctx).await })
        };
        while !device.0.lock().unwrap().waiting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        handler.cancel();
        assert_eq!(device.0.lock().unwrap().cancels, 1);

        let result = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), Error::Ctap2Status(StatusCode::KeepaliveCancel));
        // The session is gone; nothing left to interrupt
        handler.cancel();
        assert_eq!(device.0.lock().unwrap().cancels, 1);
    }

    #[tokio::test]
    async fn test_unresponsive_device_times_out() {
        let config = ClientConfig::default().with_usb_response_timeout(Duration::from_millis(10));
        let handler = UsbHandler::new(Arc::new(OneDevice), config);
        let ctx = context(CancelToken::new(), Arc::new(IgnoreStatus));

        let err = handler.start(&ctx).await.unwrap_err();
        assert_eq!(err, Error::Timeout);
    }
}

//! USB HID connection
//!
//! Speaks CTAPHID to a FIDO device through the [`HidDevice`] boundary. The
//! `usb` feature adds a hidapi-backed device and enumeration of FIDO
//! authenticators (usage page 0xF1D0).

use std::sync::Arc;
use std::time::{Duration, Instant};

use fido_client_ctap::commands::get_info::AuthenticatorInfo;
use fido_client_ctap::commands::parse_response;
use fido_client_ctap::ctap1::{Apdu, ApduResponse};
use fido_client_ctap::Ctap2Request;

use crate::channel::{Assembly, Reassembler};
use crate::connection::{CancelToken, Capabilities, CtapConnection, Interrupt};
use crate::ctaphid::{
    BROADCAST_CID, Cmd, INIT_NONCE_SIZE, InitResponse, Message, PACKET_SIZE, Packet, keepalive,
};
use crate::error::{Error, Result};

/// Raw 64-byte report exchange with a HID device
pub trait HidDevice: Send {
    fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> Result<()>;

    /// Read one report; `None` when nothing arrived within `timeout`
    fn read_report(&mut self, timeout: Duration) -> Result<Option<[u8; PACKET_SIZE]>>;

    /// Writer usable while another thread is blocked in [`read_report`](Self::read_report)
    fn report_writer(&self) -> Option<Arc<dyn ReportWriter>> {
        None
    }
}

/// Output side of a HID device, shareable across threads
pub trait ReportWriter: Send + Sync {
    fn write_report(&self, report: &[u8; PACKET_SIZE]) -> Result<()>;
}

impl<D: HidDevice + ?Sized> HidDevice for Box<D> {
    fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> Result<()> {
        (**self).write_report(report)
    }

    fn read_report(&mut self, timeout: Duration) -> Result<Option<[u8; PACKET_SIZE]>> {
        (**self).read_report(timeout)
    }

    fn report_writer(&self) -> Option<Arc<dyn ReportWriter>> {
        (**self).report_writer()
    }
}

/// Read timeouts for a USB session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbTimeouts {
    /// Longest single read
    pub response: Duration,
    /// Longest wait for one complete response
    pub request: Duration,
}

impl Default for UsbTimeouts {
    fn default() -> Self {
        Self {
            response: Duration::from_millis(1000),
            request: Duration::from_secs(30),
        }
    }
}

/// CTAPHID session on an allocated channel
pub struct UsbConnection<D: HidDevice> {
    device: D,
    cid: u32,
    init: InitResponse,
    capabilities: Capabilities,
    info: Option<AuthenticatorInfo>,
    timeouts: UsbTimeouts,
    cancel: CancelToken,
    writer: Option<Arc<dyn ReportWriter>>,
    closed: bool,
}

impl<D: HidDevice> UsbConnection<D> {
    /// Allocate a channel and negotiate capabilities
    pub fn open(device: D, timeouts: UsbTimeouts, cancel: CancelToken) -> Result<Self> {
        let writer = device.report_writer();
        let mut conn = Self {
            device,
            cid: BROADCAST_CID,
            init: InitResponse {
                nonce: [0; INIT_NONCE_SIZE],
                cid: BROADCAST_CID,
                protocol_version: 0,
                device_version: (0, 0, 0),
                capabilities: 0,
            },
            capabilities: Capabilities::empty(),
            info: None,
            timeouts,
            cancel,
            writer,
            closed: false,
        };

        conn.init = conn.handshake()?;
        conn.cid = conn.init.cid;

        let mut caps = Capabilities::empty();
        if conn.init.supports_msg() {
            caps.insert(Capabilities::CTAP1);
        }
        if conn.init.supports_wink() {
            caps.insert(Capabilities::WINK);
        }
        if conn.init.supports_cbor() {
            caps.insert(Capabilities::CTAP2);
            match conn.get_info() {
                Ok(info) => {
                    caps |= Capabilities::from_info(&info);
                    conn.info = Some(info);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => tracing::warn!(error = %e, "GetInfo failed, keeping INIT capabilities"),
            }
        }
        conn.capabilities = caps;

        tracing::info!(
            cid = format_args!("{:08X}", conn.cid),
            capabilities = ?caps,
            "USB session opened"
        );
        Ok(conn)
    }

    fn handshake(&mut self) -> Result<InitResponse> {
        let nonce: [u8; INIT_NONCE_SIZE] = rand::random();
        let request = Message::new(BROADCAST_CID, Cmd::Init, nonce.to_vec());
        let deadline = Instant::now() + self.timeouts.request;

        self.write_message(&request)?;
        loop {
            let message = self.read_message(BROADCAST_CID, deadline)?;
            if message.cmd != Cmd::Init {
                continue;
            }
            let init = InitResponse::parse(&message.data)?;
            if init.nonce != nonce {
                tracing::debug!("Skipping INIT response for another nonce");
                continue;
            }
            return Ok(init);
        }
    }

    fn get_info(&mut self) -> Result<AuthenticatorInfo> {
        let payload = self.run_ctap2(&AuthenticatorInfo::request())?;
        Ok(AuthenticatorInfo::decode(&payload)?)
    }

    pub fn channel_id(&self) -> u32 {
        self.cid
    }

    pub fn init_response(&self) -> &InitResponse {
        &self.init
    }

    /// GetInfo result, when the device speaks CTAP2
    pub fn info(&self) -> Option<&AuthenticatorInfo> {
        self.info.as_ref()
    }

    /// Ask the device to identify itself
    pub fn wink(&mut self) -> Result<()> {
        if !self.capabilities.contains(Capabilities::WINK) {
            return Err(Error::InvalidCommand);
        }
        self.transact(Cmd::Wink, &[]).map(|_| ())
    }

    fn transact(&mut self, cmd: Cmd, data: &[u8]) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.cancel.check()?;

        let deadline = Instant::now() + self.timeouts.request;
        self.write_message(&Message::new(self.cid, cmd, data.to_vec()))?;

        let message = self.read_message(self.cid, deadline)?;
        if message.cmd != cmd {
            tracing::warn!(expected = ?cmd, actual = ?message.cmd, "Unexpected response command");
            return Err(Error::InvalidResponse);
        }
        Ok(message.data)
    }

    fn write_message(&mut self, message: &Message) -> Result<()> {
        for packet in message.to_packets()? {
            tracing::trace!(frame = %hex::encode(packet.as_bytes()), "HID >>");
            self.device.write_report(packet.as_bytes())?;
        }
        Ok(())
    }

    fn read_message(&mut self, cid: u32, deadline: Instant) -> Result<Message> {
        let mut reassembler = Reassembler::new(cid);

        loop {
            if self.cancel.is_cancelled() {
                self.send_cancel();
                return Err(Error::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let wait = self.timeouts.response.min(deadline - now);

            let Some(report) = self.device.read_report(wait)? else {
                continue;
            };
            tracing::trace!(frame = %hex::encode(report), "HID <<");

            match reassembler.push(&Packet::from_bytes(report))? {
                Assembly::Pending => {}
                Assembly::Keepalive(keepalive::UP_NEEDED) => {
                    tracing::debug!("Authenticator waiting for user presence");
                }
                Assembly::Keepalive(_) => {}
                Assembly::Complete(message) => return Ok(message),
            }
        }
    }

    fn send_cancel(&mut self) {
        if self.cid == BROADCAST_CID {
            return;
        }
        let frame = Message::new(self.cid, Cmd::Cancel, Vec::new());
        if let Err(e) = self.write_message(&frame) {
            tracing::debug!(error = %e, "Failed to send CTAPHID_CANCEL");
        }
    }
}

impl<D: HidDevice> CtapConnection for UsbConnection<D> {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn run_ctap1(&mut self, apdu: &Apdu) -> Result<Vec<u8>> {
        let data = self.transact(Cmd::Msg, &apdu.encode()?)?;
        Ok(ApduResponse::decode(&data)?.into_result()?)
    }

    fn run_ctap2(&mut self, request: &Ctap2Request) -> Result<Vec<u8>> {
        let data = self.transact(Cmd::Cbor, &request.encode())?;
        Ok(parse_response(&data)?.to_vec())
    }

    fn cancel(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.write_message(&Message::new(self.cid, Cmd::Cancel, Vec::new()))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            tracing::info!(cid = format_args!("{:08X}", self.cid), "USB session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn authenticator_info(&self) -> Option<&AuthenticatorInfo> {
        self.info.as_ref()
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        if self.closed || self.cid == BROADCAST_CID {
            return None;
        }
        let writer = self.writer.clone()?;
        Some(Arc::new(ChannelCancel {
            cid: self.cid,
            writer,
        }))
    }
}

/// Sends CTAPHID_CANCEL on a session's channel from outside the session
struct ChannelCancel {
    cid: u32,
    writer: Arc<dyn ReportWriter>,
}

impl Interrupt for ChannelCancel {
    fn interrupt(&self) {
        let frame = Message::new(self.cid, Cmd::Cancel, Vec::new());
        let sent = frame.to_packets().and_then(|packets| {
            packets
                .iter()
                .try_for_each(|packet| self.writer.write_report(packet.as_bytes()))
        });
        match sent {
            Ok(()) => tracing::debug!(cid = format_args!("{:08X}", self.cid), "CTAPHID_CANCEL sent"),
            Err(e) => tracing::debug!(error = %e, "Failed to send CTAPHID_CANCEL"),
        }
    }
}

impl<D: HidDevice> Drop for UsbConnection<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "usb")]
pub use hid::{HidapiDevice, UsbDeviceInfo, enumerate_devices, init_usb};

#[cfg(feature = "usb")]
mod hid {
    use std::ffi::CString;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use hidapi::HidApi;

    use super::{HidDevice, ReportWriter};
    use crate::ctaphid::PACKET_SIZE;
    use crate::error::{Error, Result};

    const FIDO_USAGE_PAGE: u16 = 0xF1D0;
    const FIDO_USAGE: u16 = 0x01;

    /// Connected FIDO authenticator
    #[derive(Debug, Clone)]
    pub struct UsbDeviceInfo {
        pub vendor_id: u16,
        pub product_id: u16,
        /// Platform-specific device path
        pub path: String,
        pub manufacturer: Option<String>,
        pub product: Option<String>,
        pub serial_number: Option<String>,
    }

    /// [`HidDevice`] backed by hidapi
    ///
    /// A second handle on the same path carries writes issued while the
    /// session thread is blocked reading.
    pub struct HidapiDevice {
        device: hidapi::HidDevice,
        writer: Option<Arc<HidapiWriter>>,
        info: UsbDeviceInfo,
    }

    struct HidapiWriter(Mutex<hidapi::HidDevice>);

    impl ReportWriter for HidapiWriter {
        fn write_report(&self, report: &[u8; PACKET_SIZE]) -> Result<()> {
            let device = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            write_prefixed(&device, report)
        }
    }

    impl HidapiDevice {
        pub fn open(api: &HidApi, info: &UsbDeviceInfo) -> Result<Self> {
            let path = CString::new(info.path.as_str())
                .map_err(|e| Error::IoError(format!("Invalid device path: {}", e)))?;
            let device = api
                .open_path(&path)
                .map_err(|e| Error::IoError(format!("Failed to open device: {}", e)))?;
            let writer = match api.open_path(&path) {
                Ok(handle) => Some(Arc::new(HidapiWriter(Mutex::new(handle)))),
                Err(e) => {
                    tracing::debug!(error = %e, "No second handle, cancel waits for the next read");
                    None
                }
            };

            Ok(Self {
                device,
                writer,
                info: info.clone(),
            })
        }

        pub fn info(&self) -> &UsbDeviceInfo {
            &self.info
        }
    }

    fn write_prefixed(device: &hidapi::HidDevice, report: &[u8; PACKET_SIZE]) -> Result<()> {
        // Report ID 0 prefix
        let mut buf = [0u8; PACKET_SIZE + 1];
        buf[1..].copy_from_slice(report);

        let written = device
            .write(&buf)
            .map_err(|e| Error::IoError(format!("Failed to write report: {}", e)))?;
        if written < PACKET_SIZE {
            return Err(Error::IoError(format!(
                "Incomplete write: {} of {} bytes",
                written,
                buf.len()
            )));
        }
        Ok(())
    }

    impl HidDevice for HidapiDevice {
        fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> Result<()> {
            write_prefixed(&self.device, report)
        }

        fn read_report(&mut self, timeout: Duration) -> Result<Option<[u8; PACKET_SIZE]>> {
            let mut buf = [0u8; PACKET_SIZE];
            let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
            let read = self
                .device
                .read_timeout(&mut buf, millis)
                .map_err(|e| Error::IoError(format!("Failed to read report: {}", e)))?;

            match read {
                0 => Ok(None),
                PACKET_SIZE => Ok(Some(buf)),
                n => Err(Error::IoError(format!(
                    "Incomplete read: {} bytes (expected {})",
                    n, PACKET_SIZE
                ))),
            }
        }

        fn report_writer(&self) -> Option<Arc<dyn ReportWriter>> {
            self.writer
                .clone()
                .map(|writer| writer as Arc<dyn ReportWriter>)
        }
    }

    /// List connected FIDO authenticators
    pub fn enumerate_devices(api: &HidApi) -> Vec<UsbDeviceInfo> {
        api.device_list()
            .filter(|d| d.usage_page() == FIDO_USAGE_PAGE && d.usage() == FIDO_USAGE)
            .map(|d| UsbDeviceInfo {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                path: d.path().to_string_lossy().to_string(),
                manufacturer: d.manufacturer_string().map(str::to_string),
                product: d.product_string().map(str::to_string),
                serial_number: d.serial_number().map(str::to_string),
            })
            .collect()
    }

    pub fn init_usb() -> Result<HidApi> {
        HidApi::new().map_err(|e| Error::IoError(format!("Failed to initialize HID API: {}", e)))
    }
}

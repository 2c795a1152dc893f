//! Authenticator transports for a FIDO2 client
//!
//! - CTAPHID framing and reassembly over USB HID
//! - NFC (ISO-DEP) with FIDO applet selection and response continuation
//! - BLE discovery and QR handshake data for hybrid (caBLE v2) sessions
//!
//! Each physical link is wrapped in a [`CtapConnection`], which carries CTAP1
//! APDUs and CTAP2 requests for one request/response cycle. Platform handles
//! (HID devices, NFC tags, Bluetooth adapters) enter through the
//! [`HidDevice`], [`IsoDep`] and [`BlePlatform`] traits.
//!
//! # Features
//!
//! - `usb`: hidapi device backend and FIDO device enumeration (requires libudev on Linux)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#transport-specific-bindings>

pub mod ble;
pub mod channel;
pub mod connection;
pub mod ctaphid;
pub mod error;
pub mod hybrid;
pub mod nfc;
pub mod usb;

pub use ble::{BleError, BlePlatform, ScanRecord};
pub use connection::{CancelToken, Capabilities, CtapConnection, Interrupt};
pub use ctaphid::{Cmd, InitResponse, Message, Packet};
pub use error::{Error, Result};
pub use hybrid::{HandshakeData, RequestType, TunnelConnector};
pub use nfc::{IsoDep, NfcConnection, NfcLimits};
pub use usb::{HidDevice, ReportWriter, UsbConnection, UsbTimeouts};
#[cfg(feature = "usb")]
pub use usb::{HidapiDevice, UsbDeviceInfo, enumerate_devices, init_usb};

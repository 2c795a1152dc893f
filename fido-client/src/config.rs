//! Client configuration
//!
//! Timeouts, framing limits and client-data identity shared by every
//! transport handler.

use std::time::Duration;

use fido_client_transport::ctaphid::MAX_MESSAGE_SIZE;
use fido_client_transport::{NfcLimits, UsbTimeouts};

/// Client configuration
///
/// Build with `ClientConfig::default()` and the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Longest wait for a single USB HID report
    pub usb_response_timeout: Duration,

    /// Longest wait for a whole request, unless the request sets its own
    pub request_timeout: Duration,

    /// NFC GET RESPONSE rounds allowed per request
    pub nfc_max_continuations: usize,

    /// Largest CTAP message accepted over USB or NFC
    pub max_message_size: usize,

    /// How long a hybrid EID is advertised
    pub ble_advertise_duration: Duration,

    /// How long to scan for a hybrid EID
    pub ble_scan_timeout: Duration,

    /// Delay between U2F requests while waiting for a touch
    pub ctap1_presence_poll_interval: Duration,

    /// Origin written into client data (defaults to `https://<rp id>`)
    pub origin: Option<String>,

    /// Calling application package, written as `androidPackageName`
    pub package_name: Option<String>,

    /// Use U2F for registrations that do not need a resident key
    pub prefer_ctap1: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            usb_response_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            nfc_max_continuations: 16,
            max_message_size: MAX_MESSAGE_SIZE,
            ble_advertise_duration: Duration::from_secs(10),
            ble_scan_timeout: Duration::from_secs(30),
            ctap1_presence_poll_interval: Duration::from_millis(100),
            origin: None,
            package_name: None,
            prefer_ctap1: false,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_usb_response_timeout(mut self, timeout: Duration) -> Self {
        self.usb_response_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_nfc_max_continuations(mut self, rounds: usize) -> Self {
        self.nfc_max_continuations = rounds;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_ble_advertise_duration(mut self, duration: Duration) -> Self {
        self.ble_advertise_duration = duration;
        self
    }

    pub fn with_ble_scan_timeout(mut self, timeout: Duration) -> Self {
        self.ble_scan_timeout = timeout;
        self
    }

    pub fn with_ctap1_presence_poll_interval(mut self, interval: Duration) -> Self {
        self.ctap1_presence_poll_interval = interval;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_package_name(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn with_prefer_ctap1(mut self, prefer: bool) -> Self {
        self.prefer_ctap1 = prefer;
        self
    }

    /// Effective timeout for a request that may carry its own
    pub fn timeout_for(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.request_timeout)
    }

    /// USB read timeouts for a request bounded by `request_timeout`
    pub fn usb_timeouts(&self, request_timeout: Duration) -> UsbTimeouts {
        UsbTimeouts {
            response: self.usb_response_timeout,
            request: request_timeout,
        }
    }

    pub fn nfc_limits(&self) -> NfcLimits {
        NfcLimits {
            max_continuations: self.nfc_max_continuations,
            max_message_size: self.max_message_size,
        }
    }
}

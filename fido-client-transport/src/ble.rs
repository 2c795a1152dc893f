//! Bluetooth LE discovery for hybrid (caBLE v2) sessions
//!
//! BLE is only a rendezvous channel: one side advertises a 20-byte encrypted
//! EID as service data, the other scans for it. Platform callbacks resolve
//! single-shot slots, so a callback that arrives after the outcome is known
//! (or after stop) does nothing.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::connection::CancelToken;
use crate::error::{Error, Result};

/// FIDO caBLE service
pub const FIDO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff9_0000_1000_8000_00805f9b34fb);

/// Service UUID used by Apple devices for the same advertisement
pub const APPLE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fde2_0000_1000_8000_00805f9b34fb);

/// Length of the advertised service data (an encrypted EID)
pub const SERVICE_DATA_LENGTH: usize = 20;

/// Bluetooth discovery errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    NoAdapter,
    /// Adapter is off and could not be enabled
    BluetoothDisabled,
    NoScanner,
    NoAdvertiser,
    /// Service data missing or not 20 bytes
    MalformedRecord,
    /// Platform scan failure code
    ScanFailed(i32),
    /// Platform advertise failure code
    AdvertiseFailed(i32),
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleError::NoAdapter => write!(f, "No Bluetooth adapter"),
            BleError::BluetoothDisabled => write!(f, "Bluetooth is disabled"),
            BleError::NoScanner => write!(f, "BLE scanner unavailable"),
            BleError::NoAdvertiser => write!(f, "BLE advertiser unavailable"),
            BleError::MalformedRecord => write!(f, "Malformed advertisement"),
            BleError::ScanFailed(code) => write!(f, "Scan failed with code {}", code),
            BleError::AdvertiseFailed(code) => write!(f, "Advertising failed with code {}", code),
        }
    }
}

impl std::error::Error for BleError {}

/// Service data found in one advertisement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanRecord {
    pub service_data: Vec<(Uuid, Vec<u8>)>,
}

impl ScanRecord {
    pub fn with_service_data(uuid: Uuid, data: Vec<u8>) -> Self {
        Self {
            service_data: vec![(uuid, data)],
        }
    }

    fn data_for(&self, uuid: Uuid) -> Option<&[u8]> {
        self.service_data
            .iter()
            .find(|(u, _)| *u == uuid)
            .map(|(_, d)| d.as_slice())
    }
}

/// Scan filter on a service UUID; an empty mask matches any service data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Uuid,
    pub service_data: Vec<u8>,
    pub service_data_mask: Vec<u8>,
}

impl ScanFilter {
    pub fn service(uuid: Uuid) -> Self {
        Self {
            service_uuid: uuid,
            service_data: Vec::new(),
            service_data_mask: Vec::new(),
        }
    }
}

/// Advertisement content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub service_uuid: Uuid,
    pub service_data: [u8; SERVICE_DATA_LENGTH],
    pub connectable: bool,
}

/// Extract the EID from a FIDO (or Apple) service data entry
pub fn parse_service_data(record: &ScanRecord) -> std::result::Result<[u8; SERVICE_DATA_LENGTH], BleError> {
    let data = record
        .data_for(FIDO_SERVICE_UUID)
        .or_else(|| record.data_for(APPLE_SERVICE_UUID))
        .ok_or(BleError::MalformedRecord)?;

    data.try_into().map_err(|_| {
        tracing::debug!(len = data.len(), "Rejecting service data of unexpected length");
        BleError::MalformedRecord
    })
}

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

fn resolve<T>(slot: &Slot<T>, value: T) -> bool {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(_) => None,
    };
    match sender {
        Some(tx) => tx.send(value).is_ok(),
        None => {
            tracing::trace!("Ignoring late BLE callback");
            false
        }
    }
}

/// Scan result sink handed to the platform
#[derive(Clone)]
pub struct ScanCallback {
    slot: Slot<std::result::Result<[u8; SERVICE_DATA_LENGTH], BleError>>,
}

impl ScanCallback {
    fn channel() -> (Self, oneshot::Receiver<std::result::Result<[u8; SERVICE_DATA_LENGTH], BleError>>) {
        let (tx, rx) = oneshot::channel();
        let callback = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (callback, rx)
    }

    /// Returns `true` if this record resolved the scan
    pub fn on_result(&self, record: &ScanRecord) -> bool {
        resolve(&self.slot, parse_service_data(record))
    }

    pub fn on_failure(&self, code: i32) -> bool {
        resolve(&self.slot, Err(BleError::ScanFailed(code)))
    }
}

/// Advertise start outcome sink handed to the platform
#[derive(Clone)]
pub struct AdvertiseCallback {
    slot: Slot<std::result::Result<(), BleError>>,
}

impl AdvertiseCallback {
    fn channel() -> (Self, oneshot::Receiver<std::result::Result<(), BleError>>) {
        let (tx, rx) = oneshot::channel();
        let callback = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (callback, rx)
    }

    pub fn on_started(&self) -> bool {
        resolve(&self.slot, Ok(()))
    }

    pub fn on_failure(&self, code: i32) -> bool {
        resolve(&self.slot, Err(BleError::AdvertiseFailed(code)))
    }
}

/// Platform Bluetooth adapter
pub trait BlePlatform: Send + Sync {
    fn has_adapter(&self) -> bool;

    fn is_enabled(&self) -> bool;

    /// Ask the user to turn Bluetooth on; `true` if it is on afterwards
    fn request_enable(&self) -> bool;

    fn start_advertising(
        &self,
        advertisement: &Advertisement,
        callback: AdvertiseCallback,
    ) -> std::result::Result<(), BleError>;

    fn stop_advertising(&self);

    fn start_scan(&self, filters: &[ScanFilter], callback: ScanCallback) -> std::result::Result<(), BleError>;

    fn stop_scan(&self);
}

fn ensure_enabled(platform: &dyn BlePlatform) -> std::result::Result<(), BleError> {
    if !platform.has_adapter() {
        return Err(BleError::NoAdapter);
    }
    if !platform.is_enabled() && !platform.request_enable() {
        return Err(BleError::BluetoothDisabled);
    }
    Ok(())
}

struct ScanGuard<'a>(&'a dyn BlePlatform);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.stop_scan();
        tracing::debug!("BLE scan stopped");
    }
}

struct AdvertiseGuard<'a>(&'a dyn BlePlatform);

impl Drop for AdvertiseGuard<'_> {
    fn drop(&mut self) {
        self.0.stop_advertising();
        tracing::debug!("BLE advertising stopped");
    }
}

/// Scan until the first valid EID advertisement
///
/// The scan is single-shot and always stopped before returning.
pub async fn scan_for_eid(
    platform: &dyn BlePlatform,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<[u8; SERVICE_DATA_LENGTH]> {
    ensure_enabled(platform)?;

    let filters = [
        ScanFilter::service(FIDO_SERVICE_UUID),
        ScanFilter::service(APPLE_SERVICE_UUID),
    ];
    let (callback, rx) = ScanCallback::channel();
    platform.start_scan(&filters, callback)?;
    let _guard = ScanGuard(platform);
    tracing::debug!("BLE scan started");

    tokio::select! {
        outcome = rx => match outcome {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Ble(BleError::NoScanner)),
        },
        _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

/// Advertise an EID for `duration`, then stop
pub async fn advertise_eid(
    platform: &dyn BlePlatform,
    eid: [u8; SERVICE_DATA_LENGTH],
    duration: Duration,
    cancel: &CancelToken,
) -> Result<()> {
    ensure_enabled(platform)?;

    let advertisement = Advertisement {
        service_uuid: FIDO_SERVICE_UUID,
        service_data: eid,
        connectable: false,
    };
    let (callback, rx) = AdvertiseCallback::channel();
    platform.start_advertising(&advertisement, callback)?;
    let _guard = AdvertiseGuard(platform);

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    tokio::select! {
        started = rx => match started {
            Ok(result) => result?,
            Err(_) => return Err(Error::Ble(BleError::NoAdvertiser)),
        },
        _ = &mut sleep => return Ok(()),
        _ = cancel.cancelled() => return Err(Error::Cancelled),
    }
    tracing::debug!(?duration, "BLE advertising started");

    tokio::select! {
        _ = &mut sleep => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

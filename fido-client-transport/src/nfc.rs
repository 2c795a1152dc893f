//! NFC (ISO-DEP) connection
//!
//! Selects the FIDO applet, reads its version string and exchanges CTAP1
//! APDUs or CTAP2 messages wrapped in NFCCTAP_MSG. Long CTAP2 responses are
//! fetched with GET RESPONSE while the card reports status 0x9100.

use std::sync::Arc;

use fido_client_ctap::commands::get_info::AuthenticatorInfo;
use fido_client_ctap::commands::parse_response;
use fido_client_ctap::ctap1::{Apdu, ApduResponse, StatusWord};
use fido_client_ctap::Ctap2Request;

use crate::connection::{Capabilities, CtapConnection, Interrupt};
use crate::ctaphid::MAX_MESSAGE_SIZE;
use crate::error::{Error, Result};

/// FIDO applet identifier
pub const FIDO_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01];

const SELECT_HEADER: [u8; 4] = [0x00, 0xA4, 0x04, 0x00];
const GET_RESPONSE: [u8; 4] = [0x00, 0xC0, 0x00, 0x00];
const DESELECT: [u8; 4] = [0x80, 0x12, 0x01, 0x00];
const NFCCTAP_MSG_HEADER: [u8; 4] = [0x80, 0x10, 0x00, 0x00];

const VERSION_U2F: &[u8] = b"U2F_V2";
const VERSION_FIDO2: &[u8] = b"FIDO_2_0";

/// Platform ISO-DEP tag handle
pub trait IsoDep: Send {
    fn connect(&mut self) -> Result<()>;

    /// Exchange one APDU; the response includes the trailing status word
    fn transceive(&mut self, apdu: &[u8]) -> Result<Vec<u8>>;

    fn close(&mut self);

    /// Handle that releases the tag from another thread
    ///
    /// A transceive blocked on the tag must fail once it is interrupted.
    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }
}

impl<T: IsoDep + ?Sized> IsoDep for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn transceive(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        (**self).transceive(apdu)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        (**self).interrupt_handle()
    }
}

/// Response size limits for NFC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfcLimits {
    /// GET RESPONSE rounds allowed per request
    pub max_continuations: usize,
    pub max_message_size: usize,
}

impl Default for NfcLimits {
    fn default() -> Self {
        Self {
            max_continuations: 16,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Session with a FIDO applet on an NFC tag
///
/// Dropping the connection deselects the applet and releases the tag.
pub struct NfcConnection<T: IsoDep> {
    tag: T,
    limits: NfcLimits,
    capabilities: Capabilities,
    info: Option<AuthenticatorInfo>,
    closed: bool,
}

impl<T: IsoDep> NfcConnection<T> {
    pub fn open(mut tag: T, limits: NfcLimits) -> Result<Self> {
        tag.connect()?;

        // From here on Drop releases the tag on every exit path
        let mut conn = Self {
            tag,
            limits,
            capabilities: Capabilities::empty(),
            info: None,
            closed: false,
        };

        let version = conn.select()?;
        let mut caps = Capabilities::empty();
        if version == VERSION_U2F {
            caps.insert(Capabilities::CTAP1);
        } else if version == VERSION_FIDO2 {
            caps.insert(Capabilities::CTAP2);
        } else {
            tracing::debug!(version = %String::from_utf8_lossy(&version), "Unknown applet version");
        }

        match conn.get_info() {
            Ok(info) => {
                caps |= Capabilities::from_info(&info);
                conn.info = Some(info);
            }
            Err(e) => {
                tracing::warn!(error = %e, "GetInfo failed, falling back to CTAP1");
                caps = Capabilities::CTAP1;
            }
        }
        conn.capabilities = caps;

        tracing::info!(capabilities = ?caps, "NFC session opened");
        Ok(conn)
    }

    fn select(&mut self) -> Result<Vec<u8>> {
        let mut apdu = SELECT_HEADER.to_vec();
        apdu.push(FIDO_AID.len() as u8);
        apdu.extend_from_slice(&FIDO_AID);

        let response = self.exchange(&apdu)?;
        Ok(response.into_result()?)
    }

    fn get_info(&mut self) -> Result<AuthenticatorInfo> {
        let payload = self.run_ctap2(&AuthenticatorInfo::request())?;
        Ok(AuthenticatorInfo::decode(&payload)?)
    }

    pub fn info(&self) -> Option<&AuthenticatorInfo> {
        self.info.as_ref()
    }

    fn exchange(&mut self, apdu: &[u8]) -> Result<ApduResponse> {
        if self.closed {
            return Err(Error::Closed);
        }
        tracing::trace!(apdu = %hex::encode(apdu), "NFC >>");
        let raw = self.tag.transceive(apdu)?;
        tracing::trace!(response = %hex::encode(&raw), "NFC <<");
        Ok(ApduResponse::decode(&raw)?)
    }
}

/// NFCCTAP_MSG with a short length byte, or extended length above 255 bytes
fn wrap_ctap2(message: &[u8]) -> Vec<u8> {
    let mut apdu = NFCCTAP_MSG_HEADER.to_vec();
    match u8::try_from(message.len()) {
        Ok(len) => apdu.push(len),
        Err(_) => {
            apdu.push(0x00);
            apdu.extend_from_slice(&(message.len() as u16).to_be_bytes());
        }
    }
    apdu.extend_from_slice(message);
    apdu
}

fn has_more_data(status: StatusWord) -> bool {
    status == StatusWord::MORE_DATA || status.0 >> 8 == 0x61
}

impl<T: IsoDep> CtapConnection for NfcConnection<T> {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn run_ctap1(&mut self, apdu: &Apdu) -> Result<Vec<u8>> {
        Ok(self.exchange(&apdu.encode()?)?.into_result()?)
    }

    fn run_ctap2(&mut self, request: &Ctap2Request) -> Result<Vec<u8>> {
        let message = request.encode();
        if message.len() > self.limits.max_message_size {
            return Err(Error::MessageTooLarge);
        }

        let mut response = self.exchange(&wrap_ctap2(&message))?;
        let mut payload = Vec::new();
        let mut rounds = 0;

        loop {
            payload.extend_from_slice(&response.data);
            if payload.len() > self.limits.max_message_size {
                return Err(Error::MessageTooLarge);
            }
            if !has_more_data(response.status) {
                break;
            }

            rounds += 1;
            if rounds > self.limits.max_continuations {
                tracing::warn!(rounds, "Giving up on NFC response continuation");
                return Err(Error::TooManyContinuations);
            }
            response = self.exchange(&GET_RESPONSE)?;
        }

        if !response.status.is_success() {
            return Err(Error::Ctap1Status(response.status.0));
        }
        Ok(parse_response(&payload)?.to_vec())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.exchange(&DESELECT) {
            tracing::debug!(error = %e, "DESELECT failed");
        }
        self.closed = true;
        self.tag.close();
        tracing::info!("NFC session closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn authenticator_info(&self) -> Option<&AuthenticatorInfo> {
        self.info.as_ref()
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        self.tag.interrupt_handle()
    }
}

impl<T: IsoDep> Drop for NfcConnection<T> {
    fn drop(&mut self) {
        self.close();
    }
}

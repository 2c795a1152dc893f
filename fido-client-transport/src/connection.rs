//! Transport-neutral authenticator session
//!
//! A [`CtapConnection`] carries CTAP1 APDUs and CTAP2 requests over one
//! physical link for one request/response cycle. Implementations are
//! blocking; async callers drive them from `spawn_blocking`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fido_client_ctap::commands::get_info::AuthenticatorInfo;
use fido_client_ctap::ctap1::Apdu;
use fido_client_ctap::Ctap2Request;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Protocol features negotiated for one session
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const CTAP1: Self = Self(0x01);
    pub const CTAP2: Self = Self(0x02);
    pub const CTAP2_1: Self = Self(0x04);
    pub const CLIENT_PIN: Self = Self(0x08);
    pub const WINK: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Capabilities advertised by a GetInfo response
    pub fn from_info(info: &AuthenticatorInfo) -> Self {
        let mut caps = Self::CTAP2;
        if info.supports_fido_2_1() {
            caps.insert(Self::CTAP2_1);
        }
        if info.supports_ctap1() {
            caps.insert(Self::CTAP1);
        }
        if info.client_pin_supported() {
            caps.insert(Self::CLIENT_PIN);
        }
        caps
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Capabilities, &str); 5] = [
            (Capabilities::CTAP1, "CTAP1"),
            (Capabilities::CTAP2, "CTAP2"),
            (Capabilities::CTAP2_1, "CTAP2_1"),
            (Capabilities::CLIENT_PIN, "CLIENT_PIN"),
            (Capabilities::WINK, "WINK"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{}", name));
            }
        }
        set.finish()
    }
}

/// Unblocks a session from another thread
///
/// A session parked in a blocking read cannot observe a [`CancelToken`]
/// until the read returns. An interrupt reaches the link directly: USB sends
/// CTAPHID_CANCEL on the session's channel, NFC releases the tag so the
/// pending exchange fails.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// One authenticator session over a concrete transport
pub trait CtapConnection: Send {
    fn capabilities(&self) -> Capabilities;

    /// Send a U2F APDU; returns the response data on status 0x9000
    fn run_ctap1(&mut self, apdu: &Apdu) -> Result<Vec<u8>>;

    /// Send a CTAP2 request; returns the response map after a zero status byte
    fn run_ctap2(&mut self, request: &Ctap2Request) -> Result<Vec<u8>>;

    /// Abort the outstanding request, if the transport can
    fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the link; later requests fail with [`Error::Closed`]
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// GetInfo result, when the session fetched one
    fn authenticator_info(&self) -> Option<&AuthenticatorInfo> {
        None
    }

    /// Handle for aborting the session while another thread drives it
    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }

    fn has(&self, capability: Capabilities) -> bool {
        self.capabilities().contains(capability)
    }
}

impl<C: CtapConnection + ?Sized> CtapConnection for Box<C> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn run_ctap1(&mut self, apdu: &Apdu) -> Result<Vec<u8>> {
        (**self).run_ctap1(apdu)
    }

    fn run_ctap2(&mut self, request: &Ctap2Request) -> Result<Vec<u8>> {
        (**self).run_ctap2(request)
    }

    fn cancel(&mut self) -> Result<()> {
        (**self).cancel()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn authenticator_info(&self) -> Option<&AuthenticatorInfo> {
        (**self).authenticator_info()
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        (**self).interrupt_handle()
    }
}

/// Cooperative cancellation shared between a request and its transports
///
/// Blocking loops poll [`CancelToken::is_cancelled`]; async code awaits
/// [`CancelToken::cancelled`].
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.tx.send_replace(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether both handles belong to the same request
    pub fn same_token(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for also checks the current value
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_capabilities_from_info() {
        let mut options = BTreeMap::new();
        options.insert("clientPin".to_string(), true);
        let info = AuthenticatorInfo {
            versions: vec!["U2F_V2".into(), "FIDO_2_1".into()],
            options,
            ..Default::default()
        };

        let caps = Capabilities::from_info(&info);
        assert!(caps.contains(Capabilities::CTAP1 | Capabilities::CTAP2 | Capabilities::CTAP2_1));
        assert!(caps.contains(Capabilities::CLIENT_PIN));
        assert!(!caps.contains(Capabilities::WINK));
    }

    #[test]
    fn test_capabilities_debug() {
        let caps = Capabilities::CTAP1 | Capabilities::WINK;
        assert_eq!(format!("{:?}", caps), "{CTAP1, WINK}");
    }

    #[test]
    fn test_capabilities_remove() {
        let mut caps = Capabilities::CTAP1 | Capabilities::CTAP2;
        caps.remove(Capabilities::CTAP2);
        assert_eq!(caps, Capabilities::CTAP1);
        assert!(!caps.is_empty());
    }

    #[test]
    fn test_cancel_token_check() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check().unwrap_err(), Error::Cancelled);
    }

    #[test]
    fn test_cancel_token_identity() {
        let token = CancelToken::new();
        assert!(token.same_token(&token.clone()));
        assert!(!token.same_token(&CancelToken::new()));
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_cancel_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}

//! Transport handlers for roaming authenticators
//!
//! Each handler finds a device on its link, opens a [`CtapConnection`] and
//! hands it to the protocol driver on the blocking pool. The connection is
//! closed before the handler returns, whatever the outcome.
//!
//! While a session runs, its interrupt handle sits in the handler's
//! [`ActiveLink`] so `cancel()` can reach a thread blocked on the device.

pub mod hybrid;
pub mod nfc;
pub mod usb;

use std::sync::{Arc, Mutex, MutexGuard};

use fido_client_transport::{CtapConnection, Interrupt};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{RequestContext, Transport};
use crate::protocol::run_and_close;
use crate::response::AuthenticatorResponse;

pub use hybrid::{HybridHandler, QrDisplay};
pub use nfc::{NfcHandler, TagReader};
pub use usb::{HidEnumerator, UsbHandler};

/// Interrupt handle of the session a handler is driving, if any
#[derive(Default)]
pub(crate) struct ActiveLink(Mutex<Option<Arc<dyn Interrupt>>>);

impl ActiveLink {
    pub(crate) fn attach(&self, handle: Option<Arc<dyn Interrupt>>) {
        if handle.is_some() {
            *self.slot() = handle;
        }
    }

    pub(crate) fn detach(&self) {
        self.slot().take();
    }

    /// Interrupt the attached session; returns whether one was attached
    pub(crate) fn interrupt(&self) -> bool {
        let handle = self.slot().take();
        match handle {
            Some(handle) => {
                handle.interrupt();
                true
            }
            None => false,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn Interrupt>>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Detach(Arc<ActiveLink>);

impl Drop for Detach {
    fn drop(&mut self) {
        self.0.detach();
    }
}

/// Open a connection and run one request on it, off the async runtime
///
/// The session's interrupt handle stays in `link` until the blocking work
/// returns.
pub(crate) async fn run_blocking<C, F>(
    context: &RequestContext,
    config: &ClientConfig,
    transport: Transport,
    link: &Arc<ActiveLink>,
    open: F,
) -> Result<AuthenticatorResponse>
where
    C: CtapConnection + 'static,
    F: FnOnce() -> fido_client_transport::Result<C> + Send + 'static,
{
    let context = context.clone();
    let config = config.clone();
    let link = link.clone();

    tokio::task::spawn_blocking(move || {
        let _detach = Detach(link.clone());
        context.cancel.check()?;
        let mut conn = match open() {
            Ok(conn) => conn,
            Err(_) if context.cancel.is_cancelled() => return Err(Error::Cancelled),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(%transport, "Connection open");

        link.attach(conn.interrupt_handle());
        // A cancel that raced the attach found nothing to interrupt
        if context.cancel.is_cancelled() {
            link.interrupt();
        }
        run_and_close(&mut conn, &context, &config, transport)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Interrupt for Counter {
        fn interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_active_link_interrupts_once() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let link = ActiveLink::default();
        assert!(!link.interrupt());

        link.attach(Some(counter.clone()));
        assert!(link.interrupt());
        assert!(!link.interrupt());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_drops_handle() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let link = Arc::new(ActiveLink::default());
        link.attach(Some(counter.clone()));

        drop(Detach(link.clone()));
        assert!(!link.interrupt());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}

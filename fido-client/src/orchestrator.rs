//! Transport selection and request lifecycle
//!
//! The [`Orchestrator`] owns the handler set and runs one request at a time:
//!
//! ```text
//! Idle -> AwaitingSelection -> Active -> Completed | Failed
//!              |                  |
//!              +------------------+--> Cancelled
//! ```
//!
//! A request skips selection when exactly one handler can answer it without
//! the user picking a transport (a matching local credential).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fido_client_transport::CancelToken;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{IgnoreStatus, RequestContext, Status, StatusSink, Transport, TransportHandler};
use crate::request::RequestOptions;
use crate::response::AuthenticatorResponse;

/// Lifecycle state of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Waiting for the user to pick one of these transports
    AwaitingSelection(Vec<Transport>),
    Active(Transport),
    Completed,
    Cancelled,
    Failed,
}

impl State {
    /// Whether a request is in flight
    pub fn is_running(&self) -> bool {
        matches!(self, Self::AwaitingSelection(_) | Self::Active(_))
    }
}

#[derive(Default)]
struct Request {
    cancel: CancelToken,
    selection: Option<oneshot::Sender<Transport>>,
    active: Option<Arc<dyn TransportHandler>>,
}

struct Inner {
    state: State,
    request: Option<Request>,
}

impl Inner {
    /// Whether the current request is the one behind `cancel`
    fn owns(&self, cancel: &CancelToken) -> bool {
        self.request
            .as_ref()
            .is_some_and(|request| request.cancel.same_token(cancel))
    }
}

/// Counts a handler session for as long as it lives
struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Releases a request whose `start` future was dropped before finishing
struct RequestSlot<'a> {
    orchestrator: &'a Orchestrator,
    cancel: CancelToken,
}

impl Drop for RequestSlot<'_> {
    fn drop(&mut self) {
        let active = {
            let mut inner = self.orchestrator.lock();
            if !inner.owns(&self.cancel) {
                return;
            }
            tracing::debug!("Request abandoned before completion");
            self.cancel.cancel();
            let active = inner.request.take().and_then(|request| request.active);
            if inner.state.is_running() {
                Orchestrator::set_state(&mut inner, State::Cancelled);
            }
            active
        };
        if let Some(handler) = active {
            handler.cancel();
        }
    }
}

pub struct Orchestrator {
    handlers: Vec<Arc<dyn TransportHandler>>,
    config: ClientConfig,
    status: Arc<dyn StatusSink>,
    inner: Mutex<Inner>,
    open_sessions: Arc<AtomicUsize>,
}

impl Orchestrator {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            handlers: Vec::new(),
            config,
            status: Arc::new(IgnoreStatus),
            inner: Mutex::new(Inner {
                state: State::Idle,
                request: None,
            }),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn TransportHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.lock().state.clone()
    }

    /// Handler sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Transports that could serve `options` on this platform
    pub fn supported_transports(&self, options: &RequestOptions) -> Vec<Transport> {
        self.handlers
            .iter()
            .filter(|h| h.is_supported(options))
            .map(|h| h.transport())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(inner: &mut Inner, state: State) {
        tracing::debug!(from = ?inner.state, to = ?state, "Orchestrator state change");
        inner.state = state;
    }

    /// Run one request to completion
    ///
    /// Errors are classified; a second call while a request runs fails with
    /// `InvalidState` without disturbing the running one. A cancelled request
    /// keeps the orchestrator busy until its handler has returned.
    pub async fn start(&self, options: impl Into<RequestOptions>) -> Result<AuthenticatorResponse> {
        let options = options.into();
        let supported: Vec<Arc<dyn TransportHandler>> = self
            .handlers
            .iter()
            .filter(|h| h.is_supported(&options))
            .cloned()
            .collect();

        let cancel = CancelToken::new();
        let (selection_tx, selection_rx) = oneshot::channel();
        let direct = {
            let mut inner = self.lock();
            if inner.state.is_running() || inner.request.is_some() {
                tracing::warn!(state = ?inner.state, "Rejecting request while another is running");
                return Err(Error::InvalidState);
            }
            if supported.is_empty() {
                tracing::info!(rp_id = options.rp_id(), "No transport supports the request");
                Self::set_state(&mut inner, State::Failed);
                return Err(Error::NotSupported);
            }

            let instant: Vec<_> = supported
                .iter()
                .filter(|h| h.can_answer_instantly(&options))
                .collect();
            let direct = match instant.as_slice() {
                [only] => Some((*only).clone()),
                _ => None,
            };

            let mut request = Request {
                cancel: cancel.clone(),
                active: direct.clone(),
                ..Default::default()
            };
            match &direct {
                Some(handler) => Self::set_state(&mut inner, State::Active(handler.transport())),
                None => {
                    request.selection = Some(selection_tx);
                    let transports = supported.iter().map(|h| h.transport()).collect();
                    Self::set_state(&mut inner, State::AwaitingSelection(transports));
                }
            }
            inner.request = Some(request);
            direct.map(|handler| handler.transport())
        };

        let _slot = RequestSlot {
            orchestrator: self,
            cancel: cancel.clone(),
        };
        let result = self
            .run(options, &supported, cancel.clone(), direct, selection_rx)
            .await;
        self.finish(&cancel, result)
    }

    async fn run(
        &self,
        options: RequestOptions,
        supported: &[Arc<dyn TransportHandler>],
        cancel: CancelToken,
        direct: Option<Transport>,
        selection: oneshot::Receiver<Transport>,
    ) -> Result<AuthenticatorResponse> {
        let context = RequestContext::new(options, &self.config, cancel.clone(), self.status.clone())?;
        let deadline = Instant::now() + context.timeout;

        let transport = match direct {
            Some(transport) => transport,
            None => {
                self.status.status_changed(None, Status::WaitingForSelection);
                tokio::select! {
                    picked = selection => picked.map_err(|_| Error::Cancelled)?,
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => return Err(Error::Timeout),
                }
            }
        };

        let handler = supported
            .iter()
            .find(|h| h.transport() == transport)
            .cloned()
            .ok_or(Error::NotSupported)?;
        {
            let mut inner = self.lock();
            if let Some(request) = inner.request.as_mut().filter(|r| r.cancel.same_token(&cancel)) {
                request.active = Some(handler.clone());
            }
        }
        tracing::info!(%transport, rp_id = context.options.rp_id(), "Transport active");

        let _session = SessionGuard::open(&self.open_sessions);
        loop {
            let attempt = handler.start(&context);
            tokio::pin!(attempt);

            let result = tokio::select! {
                result = &mut attempt => result,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::info!(%transport, "Request timed out");
                    cancel.cancel();
                    handler.cancel();
                    // Let the handler release its session
                    let _ = attempt.await;
                    return Err(Error::Timeout);
                }
            };

            match result {
                Err(err)
                    if handler.retries_on_failure()
                        && err.is_link_failure()
                        && !cancel.is_cancelled() =>
                {
                    tracing::info!(%transport, error = %err, "Link lost, waiting for the authenticator again");
                }
                other => return other,
            }
        }
    }

    fn finish(
        &self,
        cancel: &CancelToken,
        result: Result<AuthenticatorResponse>,
    ) -> Result<AuthenticatorResponse> {
        let result = match result {
            _ if cancel.is_cancelled() && !matches!(result, Err(Error::Timeout)) => {
                Err(Error::Cancelled)
            }
            Err(err) => Err(err.classify()),
            ok => ok,
        };

        let mut inner = self.lock();
        if !inner.owns(cancel) {
            tracing::warn!("Finished request no longer owns the orchestrator");
            return result;
        }
        inner.request = None;
        if inner.state.is_running() {
            let state = match &result {
                Ok(_) => State::Completed,
                Err(Error::Cancelled) => State::Cancelled,
                Err(_) => State::Failed,
            };
            Self::set_state(&mut inner, state);
        }

        match &result {
            Ok(_) => tracing::info!("Request completed"),
            Err(err) => tracing::info!(error = %err, "Request ended"),
        }
        result
    }

    /// Pick the transport for a request awaiting selection
    pub fn select(&self, transport: Transport) -> Result<()> {
        let mut inner = self.lock();
        let State::AwaitingSelection(transports) = &inner.state else {
            return Err(Error::InvalidState);
        };
        if !transports.contains(&transport) {
            return Err(Error::NotSupported);
        }

        let sender = inner
            .request
            .as_mut()
            .and_then(|request| request.selection.take())
            .ok_or(Error::InvalidState)?;
        sender.send(transport).map_err(|_| Error::InvalidState)?;
        Self::set_state(&mut inner, State::Active(transport));
        Ok(())
    }

    /// Abort the running request; returns whether one was running
    ///
    /// The caller of [`start`](Self::start) resolves with `Cancelled` once the
    /// handler has released its session.
    pub fn cancel(&self) -> bool {
        let active = {
            let mut inner = self.lock();
            if !inner.state.is_running() {
                return false;
            }
            let Some(request) = inner.request.as_mut() else {
                return false;
            };

            request.cancel.cancel();
            request.selection = None;
            let active = request.active.clone();
            Self::set_state(&mut inner, State::Cancelled);
            active
        };

        if let Some(handler) = active {
            tracing::debug!(transport = %handler.transport(), "Cancelling active handler");
            handler.cancel();
        }
        true
    }
}

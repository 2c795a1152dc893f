//! Shared fakes for fido-client integration tests
//!
//! - [`CountingPrompt`]: scripted device-lock prompt
//! - [`SoftU2fKey`]: CTAP1-only authenticator behind CTAPHID framing
//! - [`ScriptedTag`]: NFC tag answering from a queue, optionally stalling

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fido_client::screenlock::{PromptOutcome, PromptPurpose, PromptRequest, UserPrompt};
use fido_client::{HidEnumerator, RegisterOptions, RelyingParty, SignOptions, TagReader, User};
use fido_client_crypto::KeyPair;
use fido_client_crypto::hash::sha256_concat;
use fido_client_ctap::ctap1::{
    Apdu, ApduResponse, AuthenticateControl, AuthenticateResponse, RegisterResponse, StatusWord,
    ins,
};
use fido_client_transport::channel::{Assembly, Reassembler};
use fido_client_transport::ctaphid::{BROADCAST_CID, Cmd, InitResponse, Message, PACKET_SIZE, Packet};
use fido_client_transport::{CancelToken, HidDevice, Interrupt, IsoDep};

pub const RP_ID: &str = "example.com";

pub fn register_options() -> RegisterOptions {
    RegisterOptions::new(
        RelyingParty::with_name(RP_ID, "Example"),
        User::with_details(vec![0xAA; 16], "alice@example.com", "Alice"),
        vec![0x42; 32],
    )
}

pub fn sign_options() -> SignOptions {
    SignOptions::new(RP_ID, vec![0x24; 32])
}

/// Device-lock prompt answering from a script (default: confirm)
#[derive(Default)]
pub struct CountingPrompt {
    outcomes: Mutex<VecDeque<PromptOutcome>>,
    pub prompts: Mutex<Vec<PromptPurpose>>,
    pub dismissed: AtomicBool,
    /// Leave the prompt pending until dismissed
    pub hang: bool,
}

impl CountingPrompt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Default::default()
        })
    }

    pub fn count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn push(&self, outcome: PromptOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl UserPrompt for CountingPrompt {
    fn is_device_secure(&self) -> bool {
        true
    }

    async fn prompt(&self, request: PromptRequest<'_>) -> PromptOutcome {
        self.prompts.lock().unwrap().push(request.purpose);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PromptOutcome::Confirmed)
    }

    fn dismiss(&self) {
        self.dismissed.store(true, Ordering::SeqCst);
    }
}

const U2F_CID: u32 = 0x01020304;

/// Self-signed placeholder; only the DER header is inspected
const ATTESTATION_CERT: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x01];

#[derive(Default)]
struct U2fState {
    keys: HashMap<Vec<u8>, ([u8; 32], KeyPair)>,
    counter: u32,
    /// Presence checks still to refuse with 0x6985
    touches_needed: usize,
    sent: Vec<Apdu>,
}

impl U2fState {
    fn touched(&mut self) -> bool {
        if self.touches_needed > 0 {
            self.touches_needed -= 1;
            false
        } else {
            true
        }
    }
}

/// CTAP1-only USB key with in-memory credentials
#[derive(Clone, Default)]
pub struct SoftU2fKey {
    state: Arc<Mutex<U2fState>>,
    pending: Arc<Mutex<Vec<Packet>>>,
    outbox: Arc<Mutex<VecDeque<[u8; PACKET_SIZE]>>>,
}

impl SoftU2fKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` presence checks as if the user had not touched yet
    pub fn require_touches(&self, n: usize) {
        self.state.lock().unwrap().touches_needed = n;
    }

    pub fn public_key(&self, key_handle: &[u8]) -> Option<[u8; 65]> {
        let state = self.state.lock().unwrap();
        state.keys.get(key_handle).map(|(_, key)| *key.public_key())
    }

    pub fn credential_count(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    pub fn sent(&self) -> Vec<Apdu> {
        self.state.lock().unwrap().sent.clone()
    }

    fn answer(&self, apdu: &Apdu) -> ApduResponse {
        let mut state = self.state.lock().unwrap();
        state.sent.push(apdu.clone());

        match apdu.ins {
            ins::REGISTER => {
                if !state.touched() {
                    return ApduResponse::new(Vec::new(), StatusWord::CONDITIONS_NOT_SATISFIED);
                }
                let application: [u8; 32] = apdu.data[32..64].try_into().unwrap();
                let key = KeyPair::generate();
                let key_handle = sha256_concat(&[application.as_slice(), key.public_key().as_slice()]).to_vec();

                let mut signed = vec![0x00];
                signed.extend_from_slice(&application);
                signed.extend_from_slice(&apdu.data[..32]);
                signed.extend_from_slice(&key_handle);
                signed.extend_from_slice(key.public_key());

                let response = RegisterResponse {
                    public_key: *key.public_key(),
                    key_handle: key_handle.clone(),
                    attestation_certificate: ATTESTATION_CERT.to_vec(),
                    signature: key.sign(&signed).unwrap(),
                };
                state.keys.insert(key_handle, (application, key));
                ApduResponse::new(response.encode().unwrap(), StatusWord::NO_ERROR)
            }
            ins::AUTHENTICATE => {
                let challenge = &apdu.data[..32];
                let application: [u8; 32] = apdu.data[32..64].try_into().unwrap();
                let key_handle = apdu.data[65..].to_vec();

                let known = matches!(
                    state.keys.get(&key_handle),
                    Some((app, _)) if *app == application
                );
                if !known {
                    return ApduResponse::new(Vec::new(), StatusWord::WRONG_DATA);
                }
                if apdu.p1 == AuthenticateControl::CheckOnly as u8 {
                    return ApduResponse::new(Vec::new(), StatusWord::CONDITIONS_NOT_SATISFIED);
                }
                if !state.touched() {
                    return ApduResponse::new(Vec::new(), StatusWord::CONDITIONS_NOT_SATISFIED);
                }

                state.counter += 1;
                let counter = state.counter;
                let mut signed = application.to_vec();
                signed.push(0x01);
                signed.extend_from_slice(&counter.to_be_bytes());
                signed.extend_from_slice(challenge);

                let (_, key) = &state.keys[&key_handle];
                let response = AuthenticateResponse {
                    user_presence: 0x01,
                    counter,
                    signature: key.sign(&signed).unwrap(),
                };
                ApduResponse::new(response.encode(), StatusWord::NO_ERROR)
            }
            _ => ApduResponse::new(Vec::new(), StatusWord::INS_NOT_SUPPORTED),
        }
    }

    fn handle(&self, request: Message) {
        let reply = match request.cmd {
            Cmd::Init => {
                let init = InitResponse {
                    nonce: request.data[..8].try_into().unwrap(),
                    cid: U2F_CID,
                    protocol_version: 2,
                    device_version: (1, 0, 0),
                    // No CBOR: CTAP1 only
                    capabilities: 0,
                };
                Message::new(BROADCAST_CID, Cmd::Init, init.encode())
            }
            Cmd::Msg => {
                let response = match Apdu::decode(&request.data) {
                    Ok(apdu) => self.answer(&apdu),
                    Err(_) => ApduResponse::new(Vec::new(), StatusWord::WRONG_LENGTH),
                };
                Message::new(U2F_CID, Cmd::Msg, response.encode())
            }
            _ => return,
        };

        let mut outbox = self.outbox.lock().unwrap();
        for packet in reply.to_packets().unwrap() {
            outbox.push_back(*packet.as_bytes());
        }
    }
}

impl HidDevice for SoftU2fKey {
    fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> fido_client_transport::Result<()> {
        let packet = Packet::from_bytes(*report);
        let complete = {
            let mut pending = self.pending.lock().unwrap();
            if packet.is_init() {
                pending.clear();
            }
            pending.push(packet);

            let mut reassembler = Reassembler::new(pending[0].cid());
            let mut complete = None;
            for p in pending.iter() {
                if let Assembly::Complete(message) = reassembler.push(p)? {
                    complete = Some(message);
                }
            }
            if complete.is_some() {
                pending.clear();
            }
            complete
        };

        if let Some(message) = complete {
            self.handle(message);
        }
        Ok(())
    }

    fn read_report(
        &mut self,
        _timeout: Duration,
    ) -> fido_client_transport::Result<Option<[u8; PACKET_SIZE]>> {
        Ok(self.outbox.lock().unwrap().pop_front())
    }
}

/// Enumerator exposing one shared [`SoftU2fKey`]
pub struct OneKey(pub SoftU2fKey);

impl HidEnumerator for OneKey {
    fn devices(&self) -> fido_client::Result<Vec<Box<dyn HidDevice>>> {
        Ok(vec![Box::new(self.0.clone())])
    }
}

/// Log of what a [`ScriptedTag`] saw
#[derive(Default)]
pub struct TagLog {
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub closed: AtomicBool,
    /// Set once the tag stalls on a request
    pub stalled: AtomicBool,
    /// Lets a stalled request fail as if the tag left the field
    pub release: AtomicBool,
}

/// Releases a [`ScriptedTag`] from another thread
pub struct TagRelease(Arc<TagLog>);

impl Interrupt for TagRelease {
    fn interrupt(&self) {
        self.0.release.store(true, Ordering::SeqCst);
    }
}

/// NFC tag answering from a queue
///
/// When the queue holds `None` the tag stalls until released through its
/// interrupt handle (or `TagLog::release`), then reports the tag as lost.
pub struct ScriptedTag {
    responses: VecDeque<Option<Vec<u8>>>,
    log: Arc<TagLog>,
}

impl ScriptedTag {
    pub fn new(responses: Vec<Option<Vec<u8>>>) -> (Self, Arc<TagLog>) {
        let log = Arc::new(TagLog::default());
        let tag = Self {
            responses: responses.into(),
            log: log.clone(),
        };
        (tag, log)
    }
}

impl IsoDep for ScriptedTag {
    fn connect(&mut self) -> fido_client_transport::Result<()> {
        Ok(())
    }

    fn transceive(&mut self, apdu: &[u8]) -> fido_client_transport::Result<Vec<u8>> {
        self.log.sent.lock().unwrap().push(apdu.to_vec());
        match self.responses.pop_front() {
            Some(Some(response)) => Ok(response),
            Some(None) => {
                self.log.stalled.store(true, Ordering::SeqCst);
                while !self.log.release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(fido_client_transport::Error::IoError("Tag was lost".into()))
            }
            None => Err(fido_client_transport::Error::IoError("Tag was lost".into())),
        }
    }

    fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        Some(Arc::new(TagRelease(self.log.clone())))
    }
}

/// Reader handing out queued tags, then waiting for cancellation
#[derive(Default)]
pub struct QueuedReader {
    tags: Mutex<VecDeque<ScriptedTag>>,
    pub taps: AtomicUsize,
}

impl QueuedReader {
    pub fn new(tags: Vec<ScriptedTag>) -> Arc<Self> {
        Arc::new(Self {
            tags: Mutex::new(tags.into()),
            taps: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TagReader for QueuedReader {
    fn is_available(&self) -> bool {
        true
    }

    async fn next_tag(&self, cancel: &CancelToken) -> fido_client::Result<Box<dyn IsoDep>> {
        let next = self.tags.lock().unwrap().pop_front();
        match next {
            Some(tag) => {
                self.taps.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(tag))
            }
            None => {
                cancel.cancelled().await;
                Err(fido_client::Error::Cancelled)
            }
        }
    }
}

/// Response APDU with a status word
pub fn with_sw(data: &[u8], sw: u16) -> Vec<u8> {
    let mut out = data.to_vec();
    out.extend_from_slice(&sw.to_be_bytes());
    out
}

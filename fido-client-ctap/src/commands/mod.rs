//! CTAP2 commands
//!
//! A request frame is `command byte || CBOR parameter map` (the map is absent
//! for parameterless commands such as GetInfo). A response frame is
//! `status byte || CBOR response map`.
//!
//! Command definitions:
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#commands>

pub mod get_assertion;
pub mod get_info;
pub mod make_credential;

use crate::status::{Result, StatusCode};

use alloc::vec::Vec;

/// CTAP2 command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    GetInfo = 0x04,
    GetNextAssertion = 0x08,
    Selection = 0x0B,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MakeCredential),
            0x02 => Some(Self::GetAssertion),
            0x04 => Some(Self::GetInfo),
            0x08 => Some(Self::GetNextAssertion),
            0x0B => Some(Self::Selection),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// An encoded CTAP2 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctap2Request {
    pub command: CommandCode,
    pub parameters: Vec<u8>,
}

impl Ctap2Request {
    pub fn new(command: CommandCode, parameters: Vec<u8>) -> Self {
        Self {
            command,
            parameters,
        }
    }

    /// Request without parameters
    pub fn empty(command: CommandCode) -> Self {
        Self::new(command, Vec::new())
    }

    /// `[command, parameters...]`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.parameters.len());
        out.push(self.command.to_u8());
        out.extend_from_slice(&self.parameters);
        out
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (&command, parameters) = frame.split_first().ok_or(StatusCode::InvalidLength)?;
        let command = CommandCode::from_u8(command).ok_or(StatusCode::InvalidCommand)?;
        Ok(Self::new(command, parameters.to_vec()))
    }
}

/// Split a response frame into its CBOR payload, failing on a non-zero status
pub fn parse_response(frame: &[u8]) -> Result<&[u8]> {
    let (&status, payload) = frame.split_first().ok_or(StatusCode::InvalidLength)?;
    match StatusCode::from_u8(status) {
        StatusCode::Success => Ok(payload),
        error => Err(error),
    }
}

/// Build a response frame (used by authenticators and test doubles)
pub fn encode_response(status: StatusCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(status.to_u8());
    out.extend_from_slice(payload);
    out
}

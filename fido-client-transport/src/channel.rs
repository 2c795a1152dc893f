//! CTAPHID response reassembly
//!
//! Collects the packets of one response on one channel. Frames for other
//! channels are dropped, keepalives are reported separately, and an Error
//! frame ends the exchange.

use crate::ctaphid::{Cmd, MAX_MESSAGE_SIZE, Message, Packet};
use crate::error::{Error, Result};

/// Outcome of feeding one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// More packets are needed (or the packet was ignored)
    Pending,

    /// Device is still working; carries the keepalive status byte
    Keepalive(u8),

    Complete(Message),
}

#[derive(Debug)]
struct Partial {
    cmd: Cmd,
    expected_len: usize,
    data: Vec<u8>,
    next_seq: u8,
}

/// Reassembles the response for a single channel
#[derive(Debug)]
pub struct Reassembler {
    cid: u32,
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn new(cid: u32) -> Self {
        Self { cid, partial: None }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// Feed the next packet read from the device
    pub fn push(&mut self, packet: &Packet) -> Result<Assembly> {
        if packet.cid() != self.cid {
            tracing::trace!(cid = format_args!("{:08X}", packet.cid()), "Ignoring frame for other channel");
            return Ok(Assembly::Pending);
        }

        if packet.is_init() {
            self.start(packet)
        } else {
            self.append(packet)
        }
    }

    fn start(&mut self, packet: &Packet) -> Result<Assembly> {
        let cmd = packet.cmd().ok_or(Error::InvalidCommand)?;
        let expected_len = packet.payload_len().ok_or(Error::InvalidPacket)? as usize;

        match cmd {
            Cmd::Keepalive => return Ok(Assembly::Keepalive(packet.payload()[0])),
            Cmd::Error => {
                self.partial = None;
                return Err(Error::CtapHid(packet.payload()[0]));
            }
            _ => {}
        }

        if expected_len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }
        if self.partial.is_some() {
            tracing::debug!("Initialization packet restarted a partial response");
        }

        let mut data = Vec::with_capacity(expected_len);
        let head = expected_len.min(packet.payload().len());
        data.extend_from_slice(&packet.payload()[..head]);

        let partial = Partial {
            cmd,
            expected_len,
            data,
            next_seq: 0,
        };
        self.finish_or_store(partial)
    }

    fn append(&mut self, packet: &Packet) -> Result<Assembly> {
        let Some(mut partial) = self.partial.take() else {
            tracing::debug!("Continuation packet without a response in progress");
            return Ok(Assembly::Pending);
        };

        let seq = packet.seq().ok_or(Error::InvalidSequence)?;
        if seq != partial.next_seq {
            return Err(Error::InvalidSequence);
        }

        let remaining = partial.expected_len - partial.data.len();
        let take = remaining.min(packet.payload().len());
        partial.data.extend_from_slice(&packet.payload()[..take]);
        partial.next_seq = partial.next_seq.wrapping_add(1);

        self.finish_or_store(partial)
    }

    fn finish_or_store(&mut self, partial: Partial) -> Result<Assembly> {
        if partial.data.len() >= partial.expected_len {
            Ok(Assembly::Complete(Message::new(
                self.cid,
                partial.cmd,
                partial.data,
            )))
        } else {
            self.partial = Some(partial);
            Ok(Assembly::Pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctaphid::{ErrorCode, keepalive};

    const CID: u32 = 0x11223344;

    fn feed(reassembler: &mut Reassembler, packets: &[Packet]) -> Result<Assembly> {
        let mut last = Assembly::Pending;
        for packet in packets {
            last = reassembler.push(packet)?;
        }
        Ok(last)
    }

    #[test]
    fn test_reassemble_multi_packet() {
        let data: Vec<u8> = (0..200u8).collect();
        let packets = Packet::fragment(CID, Cmd::Cbor, &data).unwrap();

        let mut reassembler = Reassembler::new(CID);
        let result = feed(&mut reassembler, &packets).unwrap();

        assert_eq!(result, Assembly::Complete(Message::new(CID, Cmd::Cbor, data)));
    }

    #[test]
    fn test_other_channel_ignored() {
        let mut reassembler = Reassembler::new(CID);
        let foreign = Packet::fragment(0x99, Cmd::Cbor, &[1, 2, 3]).unwrap();

        assert_eq!(reassembler.push(&foreign[0]).unwrap(), Assembly::Pending);
    }

    #[test]
    fn test_keepalive_reported() {
        let mut reassembler = Reassembler::new(CID);
        let packets = Packet::fragment(CID, Cmd::Keepalive, &[keepalive::UP_NEEDED]).unwrap();

        assert_eq!(
            reassembler.push(&packets[0]).unwrap(),
            Assembly::Keepalive(keepalive::UP_NEEDED)
        );
    }

    #[test]
    fn test_error_frame() {
        let mut reassembler = Reassembler::new(CID);
        let packet = Packet::new_error(CID, ErrorCode::InvalidLen);

        assert_eq!(reassembler.push(&packet).unwrap_err(), Error::CtapHid(0x03));
    }

    #[test]
    fn test_out_of_sequence_continuation() {
        let data = vec![0x33; 200];
        let packets = Packet::fragment(CID, Cmd::Cbor, &data).unwrap();

        let mut reassembler = Reassembler::new(CID);
        reassembler.push(&packets[0]).unwrap();

        assert_eq!(
            reassembler.push(&packets[2]).unwrap_err(),
            Error::InvalidSequence
        );
    }

    #[test]
    fn test_declared_length_above_cap() {
        let mut raw = [0u8; 64];
        raw[0..4].copy_from_slice(&CID.to_be_bytes());
        raw[4] = Cmd::Cbor.to_u8_init();
        raw[5..7].copy_from_slice(&7610u16.to_be_bytes());

        let mut reassembler = Reassembler::new(CID);
        assert_eq!(
            reassembler.push(&Packet::from_bytes(raw)).unwrap_err(),
            Error::MessageTooLarge
        );
    }
}

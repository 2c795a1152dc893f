//! CTAPHID framing
//!
//! Packet Format:
//! - Initialization packet: CID(4) + CMD(1) + BCNT(2) + DATA(57)
//! - Continuation packet: CID(4) + SEQ(1) + DATA(59)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#usb-hid-framing>

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// HID report size
pub const PACKET_SIZE: usize = 64;

/// Largest message the framing can carry: 57 + 128 * 59
pub const MAX_MESSAGE_SIZE: usize = 7609;

/// Channel used for INIT before a channel is allocated
pub const BROADCAST_CID: u32 = 0xFFFFFFFF;

/// Size of the INIT nonce
pub const INIT_NONCE_SIZE: usize = 8;

const INIT_PACKET_DATA_SIZE: usize = PACKET_SIZE - 7;
const CONT_PACKET_DATA_SIZE: usize = PACKET_SIZE - 5;
const MAX_SEQ: u8 = 0x7F;
const TYPE_INIT: u8 = 0x80;

/// CTAPHID commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Echo request
    Ping = 0x01,

    /// Encapsulated CTAP1/U2F APDU
    Msg = 0x03,

    Lock = 0x04,

    /// Allocate a channel
    Init = 0x06,

    /// Ask the device to identify itself (blink, beep)
    Wink = 0x08,

    /// Encapsulated CTAP2 request
    Cbor = 0x10,

    /// Abort the outstanding request on a channel
    Cancel = 0x11,

    /// Device is still processing
    Keepalive = 0x3B,

    Error = 0x3F,
}

impl Cmd {
    /// Parse a command byte, with or without the TYPE bit
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & !TYPE_INIT {
            0x01 => Some(Cmd::Ping),
            0x03 => Some(Cmd::Msg),
            0x04 => Some(Cmd::Lock),
            0x06 => Some(Cmd::Init),
            0x08 => Some(Cmd::Wink),
            0x10 => Some(Cmd::Cbor),
            0x11 => Some(Cmd::Cancel),
            0x3B => Some(Cmd::Keepalive),
            0x3F => Some(Cmd::Error),
            _ => None,
        }
    }

    /// Command byte as it appears in an initialization packet
    pub fn to_u8_init(self) -> u8 {
        (self as u8) | TYPE_INIT
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// CTAPHID error codes carried by an Error frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidCmd = 0x01,
    InvalidPar = 0x02,
    InvalidLen = 0x03,
    InvalidSeq = 0x04,
    MsgTimeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    InvalidChannel = 0x0B,
    Other = 0x7F,
}

impl ErrorCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => ErrorCode::InvalidCmd,
            0x02 => ErrorCode::InvalidPar,
            0x03 => ErrorCode::InvalidLen,
            0x04 => ErrorCode::InvalidSeq,
            0x05 => ErrorCode::MsgTimeout,
            0x06 => ErrorCode::ChannelBusy,
            0x0A => ErrorCode::LockRequired,
            0x0B => ErrorCode::InvalidChannel,
            _ => ErrorCode::Other,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Keepalive status byte
pub mod keepalive {
    pub const PROCESSING: u8 = 0x01;
    pub const UP_NEEDED: u8 = 0x02;
}

/// Device capability bits from the INIT response
pub mod capability {
    pub const WINK: u8 = 0x01;
    pub const CBOR: u8 = 0x04;
    /// Set when the device does NOT implement CTAPHID_MSG
    pub const NMSG: u8 = 0x08;
}

/// Packets of one message; requests rarely need more than four reports
pub type Packets = SmallVec<[Packet; 4]>;

/// A single 64-byte HID report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: [u8; PACKET_SIZE],
}

impl Packet {
    pub fn from_bytes(data: [u8; PACKET_SIZE]) -> Self {
        Self { data }
    }

    /// Build from a slice, which must be exactly 64 bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let data: [u8; PACKET_SIZE] = data.try_into().map_err(|_| Error::InvalidPacket)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    pub fn is_init(&self) -> bool {
        (self.data[4] & TYPE_INIT) != 0
    }

    /// Command (initialization packets only)
    pub fn cmd(&self) -> Option<Cmd> {
        self.is_init().then(|| Cmd::from_u8(self.data[4])).flatten()
    }

    /// Declared message length (initialization packets only)
    pub fn payload_len(&self) -> Option<u16> {
        self.is_init()
            .then(|| u16::from_be_bytes([self.data[5], self.data[6]]))
    }

    /// Sequence number (continuation packets only)
    pub fn seq(&self) -> Option<u8> {
        (!self.is_init()).then_some(self.data[4])
    }

    pub fn payload(&self) -> &[u8] {
        if self.is_init() {
            &self.data[7..]
        } else {
            &self.data[5..]
        }
    }

    /// Fragment a message into one initialization packet and up to 128
    /// continuation packets
    pub fn fragment(cid: u32, cmd: Cmd, data: &[u8]) -> Result<Packets> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let (head, tail) = data.split_at(data.len().min(INIT_PACKET_DATA_SIZE));

        let mut init = [0u8; PACKET_SIZE];
        init[0..4].copy_from_slice(&cid.to_be_bytes());
        init[4] = cmd.to_u8_init();
        init[5..7].copy_from_slice(&(data.len() as u16).to_be_bytes());
        init[7..7 + head.len()].copy_from_slice(head);

        let mut packets = Packets::new();
        packets.push(Packet::from_bytes(init));

        for (seq, chunk) in tail.chunks(CONT_PACKET_DATA_SIZE).enumerate() {
            if seq > MAX_SEQ as usize {
                return Err(Error::MessageTooLarge);
            }
            let mut cont = [0u8; PACKET_SIZE];
            cont[0..4].copy_from_slice(&cid.to_be_bytes());
            cont[4] = seq as u8;
            cont[5..5 + chunk.len()].copy_from_slice(chunk);
            packets.push(Packet::from_bytes(cont));
        }

        Ok(packets)
    }

    /// Error frame, as sent by a device
    pub fn new_error(cid: u32, error_code: ErrorCode) -> Self {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0..4].copy_from_slice(&cid.to_be_bytes());
        packet[4] = Cmd::Error.to_u8_init();
        packet[5..7].copy_from_slice(&1u16.to_be_bytes());
        packet[7] = error_code.to_u8();

        Packet::from_bytes(packet)
    }
}

/// A complete CTAPHID message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    pub cmd: Cmd,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, cmd: Cmd, data: Vec<u8>) -> Self {
        Self { cid, cmd, data }
    }

    pub fn to_packets(&self) -> Result<Packets> {
        Packet::fragment(self.cid, self.cmd, &self.data)
    }
}

/// CTAPHID_INIT response
///
/// `nonce(8) || cid(4) || protocol(1) || major(1) || minor(1) || build(1) || capabilities(1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitResponse {
    pub nonce: [u8; INIT_NONCE_SIZE],
    pub cid: u32,
    pub protocol_version: u8,
    pub device_version: (u8, u8, u8),
    pub capabilities: u8,
}

impl InitResponse {
    pub const LENGTH: usize = 17;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::InvalidResponse);
        }

        let mut nonce = [0u8; INIT_NONCE_SIZE];
        nonce.copy_from_slice(&data[..8]);

        Ok(Self {
            nonce,
            cid: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            protocol_version: data[12],
            device_version: (data[13], data[14], data[15]),
            capabilities: data[16],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LENGTH);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.cid.to_be_bytes());
        out.push(self.protocol_version);
        out.extend_from_slice(&[
            self.device_version.0,
            self.device_version.1,
            self.device_version.2,
        ]);
        out.push(self.capabilities);
        out
    }

    pub fn supports_wink(&self) -> bool {
        self.capabilities & capability::WINK != 0
    }

    pub fn supports_cbor(&self) -> bool {
        self.capabilities & capability::CBOR != 0
    }

    pub fn supports_msg(&self) -> bool {
        self.capabilities & capability::NMSG == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_conversion() {
        assert_eq!(Cmd::from_u8(0x90), Some(Cmd::Cbor));
        assert_eq!(Cmd::from_u8(0xBB), Some(Cmd::Keepalive));
        assert_eq!(Cmd::from_u8(0x7E), None);
        assert_eq!(Cmd::Init.to_u8_init(), 0x86);
    }

    #[test]
    fn test_single_packet_layout() {
        let packets = Packet::fragment(0x01020304, Cmd::Msg, &[0xAA, 0xBB]).unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(
            &packets[0].as_bytes()[..9],
            &[0x01, 0x02, 0x03, 0x04, 0x83, 0x00, 0x02, 0xAA, 0xBB]
        );
        assert!(packets[0].as_bytes()[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_continuation_sequence() {
        let data = vec![0x42; 57 + 59 + 1];
        let packets = Packet::fragment(0xABCDEF01, Cmd::Cbor, &data).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].payload_len(), Some(117));
        assert_eq!(packets[1].seq(), Some(0));
        assert_eq!(packets[2].seq(), Some(1));
        assert_eq!(packets[2].cid(), 0xABCDEF01);
    }

    #[test]
    fn test_largest_message_uses_all_sequence_numbers() {
        let packets = Packet::fragment(1, Cmd::Cbor, &vec![0; MAX_MESSAGE_SIZE]).unwrap();

        assert_eq!(packets.len(), 129);
        assert_eq!(packets.last().unwrap().seq(), Some(127));
    }

    #[test]
    fn test_message_too_large() {
        let result = Packet::fragment(1, Cmd::Cbor, &vec![0; MAX_MESSAGE_SIZE + 1]);
        assert_eq!(result.unwrap_err(), Error::MessageTooLarge);
    }

    #[test]
    fn test_error_packet() {
        let packet = Packet::new_error(0xDEADBEEF, ErrorCode::ChannelBusy);

        assert_eq!(packet.cmd(), Some(Cmd::Error));
        assert_eq!(packet.payload_len(), Some(1));
        assert_eq!(ErrorCode::from_u8(packet.payload()[0]), ErrorCode::ChannelBusy);
    }

    #[test]
    fn test_init_response_parse() {
        let mut raw = hex::decode("0102030405060708cafebabe02050201").unwrap();
        raw.push(capability::WINK | capability::CBOR);

        let init = InitResponse::parse(&raw).unwrap();
        assert_eq!(init.nonce, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(init.cid, 0xCAFEBABE);
        assert_eq!(init.protocol_version, 2);
        assert_eq!(init.device_version, (5, 2, 1));
        assert!(init.supports_wink());
        assert!(init.supports_cbor());
        assert!(init.supports_msg());
    }

    #[test]
    fn test_init_response_too_short() {
        assert_eq!(
            InitResponse::parse(&[0u8; 16]).unwrap_err(),
            Error::InvalidResponse
        );
    }

    #[test]
    fn test_nmsg_clears_ctap1() {
        let init = InitResponse {
            nonce: [0; 8],
            cid: 1,
            protocol_version: 2,
            device_version: (1, 0, 0),
            capabilities: capability::CBOR | capability::NMSG,
        };
        assert!(!init.supports_msg());
        assert_eq!(InitResponse::parse(&init.encode()).unwrap(), init);
    }
}

//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//! - Computing and verifying the 16-bit one's-complement checksum.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Layout
//!
//! All multi-byte fields are little-endian.  Both peers run this codec, so
//! the byte order is identical on both ends of the wire.
//!
//! ```text
//!  offset  0        4        8      10      12      14      16       20
//!          ├─seq_num─┼─ack_num─┼─flags─┼─window─┼─dlen──┼─cksum─┼─reserved─┤─payload…
//! ```
//!
//! The four reserved bytes are zero on the wire and covered by the checksum;
//! they pad the header to [`HEADER_SIZE`].

use thiserror::Error;

/// Maximum size of one datagram (header + payload), the Ethernet MTU.
pub const MAX_BUFFER_SIZE: usize = 1500;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 20;

/// Maximum payload bytes per packet.
pub const MAX_DATA_SIZE: usize = MAX_BUFFER_SIZE - HEADER_SIZE;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u16 = 1 << 0;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 1 << 1;
    /// Finish — sender has no more data to send.
    pub const FIN: u16 = 1 << 2;
}

/// A complete protocol datagram: header fields + payload bytes.
///
/// Data packets number their sequence from 1 upward, one per packet.  The
/// `checksum` field is filled in by the constructors below, so any packet
/// built through them verifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number of this packet (data packets start at 1).
    pub seq_num: u32,
    /// Cumulative acknowledgement: highest sequence delivered in order.
    pub ack_num: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Advertised receive window.  Carried on the wire, never consulted.
    pub window_size: u16,
    /// One's-complement checksum over header + payload.
    pub checksum: u16,
    /// Payload bytes (`data_len` on the wire).
    pub payload: Vec<u8>,
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram shorter than the {HEADER_SIZE}-byte header")]
    BufferTooShort,
    /// `data_len` field does not fit the actual remaining bytes.
    #[error("data_len field inconsistent with received datagram")]
    LengthMismatch,
    /// The reserved header bytes must be zero on the wire.
    #[error("reserved header bytes are not zero")]
    ReservedNotZero,
}

impl Packet {
    fn new(seq_num: u32, ack_num: u32, flags: u16, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_DATA_SIZE);
        let mut pkt = Self {
            seq_num,
            ack_num,
            flags,
            window_size: crate::FLOW_CONTROL_WINDOW_SIZE as u16,
            checksum: 0,
            payload,
        };
        pkt.checksum = pkt.compute_checksum();
        pkt
    }

    /// Handshake opener: `SYN`, sequence 0.
    pub fn syn() -> Self {
        Self::new(0, 0, flags::SYN, Vec::new())
    }

    /// Handshake reply: `SYN|ACK` acknowledging the peer's SYN.
    pub fn syn_ack(ack_num: u32) -> Self {
        Self::new(0, ack_num, flags::SYN | flags::ACK, Vec::new())
    }

    /// Pure acknowledgement.
    pub fn ack(ack_num: u32) -> Self {
        Self::new(0, ack_num, flags::ACK, Vec::new())
    }

    /// Data packet carrying up to [`MAX_DATA_SIZE`] payload bytes.
    pub fn data(seq_num: u32, payload: Vec<u8>) -> Self {
        Self::new(seq_num, 0, 0, payload)
    }

    /// Teardown opener: `FIN` at the sequence after the last data packet.
    pub fn fin(seq_num: u32) -> Self {
        Self::new(seq_num, 0, flags::FIN, Vec::new())
    }

    /// Teardown reply: `ACK|FIN` acknowledging the peer's FIN.
    pub fn fin_ack(ack_num: u32) -> Self {
        Self::new(0, ack_num, flags::ACK | flags::FIN, Vec::new())
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    /// Payload length as carried in the `data_len` wire field.
    pub fn data_len(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header_bytes(self.checksum));
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns `Err` if the buffer is too short or `data_len` is
    /// inconsistent with the bytes actually received.  Checksum validity is
    /// a separate concern — see [`Packet::verify`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE {
            return Err(PacketError::BufferTooShort);
        }
        let seq_num = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let ack_num = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let flags = u16::from_le_bytes([buf[8], buf[9]]);
        let window_size = u16::from_le_bytes([buf[10], buf[11]]);
        let data_len = u16::from_le_bytes([buf[12], buf[13]]) as usize;
        let checksum = u16::from_le_bytes([buf[14], buf[15]]);

        if data_len > MAX_DATA_SIZE || buf.len() < HEADER_SIZE + data_len {
            return Err(PacketError::LengthMismatch);
        }
        if buf[16..20] != [0, 0, 0, 0] {
            // The checksum is computed with the reserved region zeroed, so a
            // corrupted reserved byte would otherwise slip through verify.
            return Err(PacketError::ReservedNotZero);
        }

        Ok(Self {
            seq_num,
            ack_num,
            flags,
            window_size,
            checksum,
            payload: buf[HEADER_SIZE..HEADER_SIZE + data_len].to_vec(),
        })
    }

    /// 16-bit one's-complement checksum over header + payload with the
    /// checksum field treated as zero.
    ///
    /// The region is summed as little-endian 16-bit words into a 32-bit
    /// accumulator; an odd trailing byte joins as the low byte of a final
    /// word; carries are folded back until the high half is clear, and the
    /// folded sum is complemented.
    pub fn compute_checksum(&self) -> u16 {
        let header = self.header_bytes(0);
        let mut sum: u32 = 0;
        let mut bytes = header.iter().chain(self.payload.iter());
        while let Some(&lo) = bytes.next() {
            let hi = bytes.next().copied().unwrap_or(0);
            sum += u32::from(u16::from_le_bytes([lo, hi]));
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }

    /// Recompute the checksum and compare against the stored field.
    ///
    /// Callers discard packets that fail verification without replying.
    pub fn verify(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    fn header_bytes(&self, checksum: u16) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&self.seq_num.to_le_bytes());
        header[4..8].copy_from_slice(&self.ack_num.to_le_bytes());
        header[8..10].copy_from_slice(&self.flags.to_le_bytes());
        header[10..12].copy_from_slice(&self.window_size.to_le_bytes());
        header[12..14].copy_from_slice(&(self.payload.len() as u16).to_le_bytes());
        header[14..16].copy_from_slice(&checksum.to_le_bytes());
        // bytes 16..20 stay zero (reserved)
        header
    }
}

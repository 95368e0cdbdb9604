//! Receive-side engine: in-order delivery with a selective buffer.
//!
//! [`ReceiverCore`] implements the delivery rule:
//!
//! - Only the **expected** sequence number is written through to the sink;
//!   doing so drains every contiguous successor parked in the buffer.
//! - Out-of-order packets (seq > expected) are **buffered**, not dropped,
//!   up to a bounded number of entries.
//! - Old packets (seq < expected) are discarded — their bytes already
//!   reached the sink.
//!
//! After every data packet, whatever the branch, the caller sends one
//! cumulative ACK carrying [`ReceiverCore::ack_num`] — the highest sequence
//! delivered in order.  The wire ACK stays cumulative even though the
//! buffer behaves selectively.
//!
//! `ReceiverCore` only manages state; all socket I/O lives in
//! [`FileReceiver`], which drives the ingest loop and the FIN teardown.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::connection::{ConnError, Connection};
use crate::packet::Packet;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::FLOW_CONTROL_WINDOW_SIZE;

// ---------------------------------------------------------------------------
// ReceiverCore
// ---------------------------------------------------------------------------

/// What happened to one ingested data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// In-order: this many bytes went to the sink (packet + drained buffer).
    Delivered(usize),
    /// Out-of-order: parked in the receive buffer.
    Buffered,
    /// Out-of-order but the buffer is full; dropped, will be retransmitted.
    BufferFull,
    /// Already delivered earlier; payload discarded.
    Duplicate,
}

/// Selective-repeat receive state for one connection.
#[derive(Debug)]
pub struct ReceiverCore {
    /// Next sequence number to write through (data numbering starts at 1).
    expected_seq: u32,
    /// Validated out-of-order packets, keyed by sequence number.  Every key
    /// is strictly greater than `expected_seq`.
    buffer: BTreeMap<u32, Vec<u8>>,
}

impl Default for ReceiverCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverCore {
    pub fn new() -> Self {
        Self {
            expected_seq: 1,
            buffer: BTreeMap::new(),
        }
    }

    /// Process one validated data packet, writing in-order bytes to `sink`.
    pub fn ingest<W: Write>(
        &mut self,
        seq_num: u32,
        payload: &[u8],
        sink: &mut W,
    ) -> std::io::Result<Ingest> {
        if seq_num == self.expected_seq {
            sink.write_all(payload)?;
            let mut delivered = payload.len();
            self.expected_seq += 1;
            // Drain every contiguous successor parked in the buffer.
            while let Some(parked) = self.buffer.remove(&self.expected_seq) {
                sink.write_all(&parked)?;
                delivered += parked.len();
                self.expected_seq += 1;
            }
            Ok(Ingest::Delivered(delivered))
        } else if seq_num > self.expected_seq {
            if self.buffer.len() >= FLOW_CONTROL_WINDOW_SIZE && !self.buffer.contains_key(&seq_num)
            {
                // Bounded buffer: the sender will retransmit this one.
                Ok(Ingest::BufferFull)
            } else {
                // Duplicates overwrite with identical contents.
                self.buffer.insert(seq_num, payload.to_vec());
                Ok(Ingest::Buffered)
            }
        } else {
            // Already written through; the ACK that told the sender so was
            // lost.  Re-ACK, never re-write.
            Ok(Ingest::Duplicate)
        }
    }

    /// Cumulative acknowledgement number: highest sequence delivered in
    /// order so far.
    pub fn ack_num(&self) -> u32 {
        self.expected_seq - 1
    }

    /// Number of out-of-order packets currently parked.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

// ---------------------------------------------------------------------------
// FileReceiver
// ---------------------------------------------------------------------------

/// Counters reported to the caller when the transfer completes.
#[derive(Debug, Clone, Default)]
pub struct ReceiveStats {
    /// Data packets that passed checksum verification.
    pub packets_received: u32,
    /// Packets that arrived ahead of the in-order cursor.
    pub out_of_order_packets: u32,
    /// Packets below the in-order cursor (retransmits of delivered data).
    pub duplicate_packets: u32,
    /// Bytes written through to the sink.
    pub bytes_written: usize,
    /// Wall-clock time from the first data packet to the FIN.
    pub elapsed: Duration,
}

/// Receive side of one file transfer.
///
/// Single-threaded: blocks only on socket receive, per the transport's
/// scheduling model.
pub struct FileReceiver {
    /// Current FSM state.
    pub state: ConnectionState,
    socket: Socket,
    peer: SocketAddr,
    core: ReceiverCore,
    pending: Option<Packet>,
}

impl FileReceiver {
    /// Accept one inbound connection on `socket` (passive open).
    pub async fn accept(socket: Socket) -> Result<Self, ConnError> {
        let conn = Connection::accept(socket).await?;
        let (socket, peer, state, pending) = conn.into_parts();
        Ok(Self {
            state,
            socket,
            peer,
            core: ReceiverCore::new(),
            pending,
        })
    }

    /// Run the ingest loop until the peer's FIN, writing the in-order byte
    /// stream to `sink`.
    ///
    /// Malformed and checksum-invalid datagrams are dropped silently; the
    /// sender's retransmission covers them.  Every accepted data packet is
    /// answered with exactly one cumulative ACK.
    pub async fn receive_to<W: Write>(&mut self, sink: &mut W) -> Result<ReceiveStats, ConnError> {
        let start = Instant::now();
        let mut stats = ReceiveStats::default();
        let mut next = self.pending.take();

        loop {
            let pkt = match next.take() {
                Some(pkt) => pkt,
                None => match self.socket.recv_from().await {
                    Ok((pkt, addr)) if addr == self.peer => pkt,
                    Ok(_) => continue, // stranger traffic
                    Err(SocketError::Packet(e)) => {
                        log::debug!("[rcv] undecodable datagram dropped: {e}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            if !pkt.verify() {
                log::debug!("[rcv] checksum mismatch, discarding SEQ={}", pkt.seq_num);
                continue;
            }

            if pkt.is_syn() {
                // Our handshake ACK path was lossy; answer the duplicate SYN.
                let syn_ack = Packet::syn_ack(pkt.seq_num + 1);
                self.socket.send_to(&syn_ack, self.peer).await?;
                continue;
            }

            if pkt.is_fin() {
                let fin_ack = Packet::fin_ack(pkt.seq_num + 1);
                self.socket.send_to(&fin_ack, self.peer).await?;
                self.state = ConnectionState::Closed;
                log::info!("[rcv] ← FIN; → FIN-ACK — closed");
                break;
            }

            stats.packets_received += 1;
            match self.core.ingest(pkt.seq_num, &pkt.payload, sink)? {
                Ingest::Delivered(n) => {
                    stats.bytes_written += n;
                    log::debug!(
                        "[rcv] ← DATA seq={} len={} delivered {n} byte(s)",
                        pkt.seq_num,
                        pkt.data_len()
                    );
                }
                Ingest::Buffered => {
                    stats.out_of_order_packets += 1;
                    log::debug!(
                        "[rcv] ← DATA seq={} out of order (expecting {}), buffered",
                        pkt.seq_num,
                        self.core.expected_seq
                    );
                }
                Ingest::BufferFull => {
                    stats.out_of_order_packets += 1;
                    log::debug!(
                        "[rcv] ← DATA seq={} dropped: receive buffer full",
                        pkt.seq_num
                    );
                }
                Ingest::Duplicate => {
                    stats.duplicate_packets += 1;
                    log::debug!("[rcv] ← DATA seq={} duplicate, re-ACKing", pkt.seq_num);
                }
            }

            let ack = Packet::ack(self.core.ack_num());
            self.socket.send_to(&ack, self.peer).await?;
        }

        stats.elapsed = start.elapsed();
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Three-way connection establishment, active and passive.
//!
//! A [`Connection`] is the result of a completed handshake: a socket, the
//! peer's address, and the FSM state.  The sender performs an active open
//! ([`Connection::connect`]); the receiver a passive one
//! ([`Connection::accept`]).
//!
//! The handshake:
//!
//! ```text
//!  sender                        receiver
//!    │ ── SYN  (seq=0) ──────────▶ │
//!    │ ◀─ SYN|ACK (ack=seq+1) ──── │
//!    │ ── ACK  (ack=seq+1) ───────▶ │
//!  ESTABLISHED                  ESTABLISHED
//! ```
//!
//! Control packets get no delivery guarantee from UDP, so both ends retry:
//! the active side resends its SYN up to [`MAX_RETRIES`] times on a
//! [`PACKET_TIMEOUT`] silence, and the passive side resends the SYN-ACK.  A
//! lost final ACK is covered on the passive side by accepting the first data
//! (or FIN) packet as proof the sender reached ESTABLISHED; that packet is
//! handed back to the caller as `pending` so no datagram is lost.

use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;
use tokio::time::timeout;

use crate::packet::{flags, Packet};
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::{MAX_RETRIES, PACKET_TIMEOUT};

/// Errors reported by connection setup and transfer.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The peer never answered the handshake within the retry budget.
    #[error("handshake failed: no response from peer")]
    HandshakeFailed,
    /// Underlying socket failure.
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The local byte sink (file) could not be written.
    #[error("sink I/O error: {0}")]
    Sink(#[from] std::io::Error),
}

/// A handle to one established peer-to-peer session.
#[derive(Debug)]
pub struct Connection {
    /// Current FSM state.
    pub state: ConnectionState,
    /// Underlying datagram socket.
    pub socket: Socket,
    /// Remote peer address.
    pub peer: SocketAddr,
    /// A data or FIN packet that arrived during the handshake tail and
    /// belongs to the data phase.
    pub pending: Option<Packet>,
}

impl Connection {
    /// Perform an active open (sender side).
    ///
    /// Sends SYN and waits for SYN-ACK, retrying on timeout.  Returns
    /// [`ConnError::HandshakeFailed`] once the retry budget is exhausted.
    pub async fn connect(socket: Socket, peer: SocketAddr) -> Result<Self, ConnError> {
        let syn = Packet::syn();
        let mut state = ConnectionState::SynSent;

        for attempt in 0..=MAX_RETRIES {
            socket.send_to(&syn, peer).await?;
            log::debug!("[snd] {state}: → SYN (attempt {})", attempt + 1);

            match timeout(PACKET_TIMEOUT, socket.recv_from()).await {
                Err(_elapsed) => continue,
                Ok(Err(SocketError::Packet(_))) => continue,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((pkt, addr))) => {
                    if addr != peer || !pkt.verify() {
                        continue;
                    }
                    if pkt.flags == (flags::SYN | flags::ACK) {
                        let ack = Packet::ack(pkt.seq_num + 1);
                        socket.send_to(&ack, peer).await?;
                        state = ConnectionState::Established;
                        log::debug!("[snd] ← SYN-ACK; → ACK — {state}");
                        return Ok(Self {
                            state,
                            socket,
                            peer,
                            pending: None,
                        });
                    }
                }
            }
        }

        log::warn!("[snd] handshake gave up after {} attempts", MAX_RETRIES + 1);
        Err(ConnError::HandshakeFailed)
    }

    /// Perform a passive open (receiver side).
    ///
    /// Blocks until a SYN arrives (no deadline — a server waits), then
    /// answers with SYN-ACK and waits for the final ACK.  The SYN-ACK is
    /// resent on timeout; a first data or FIN packet counts as an implicit
    /// final ACK and is preserved in `pending`.
    pub async fn accept(socket: Socket) -> Result<Self, ConnError> {
        let mut state = ConnectionState::Listen;

        // Phase 1: wait for a valid SYN from anyone.
        let (peer, syn_seq) = loop {
            match socket.recv_from().await {
                Ok((pkt, addr)) if pkt.verify() && pkt.is_syn() => {
                    log::debug!("[rcv] {state}: ← SYN from {addr}");
                    break (addr, pkt.seq_num);
                }
                Ok(_) => continue,
                Err(SocketError::Packet(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        // Phase 2: SYN-ACK, then wait out the final ACK.
        let syn_ack = Packet::syn_ack(syn_seq + 1);
        let mut pending = None;
        let mut established = false;

        'attempts: for attempt in 0..=MAX_RETRIES {
            socket.send_to(&syn_ack, peer).await?;
            log::debug!("[rcv] {state}: → SYN-ACK (attempt {})", attempt + 1);

            let deadline = Instant::now() + PACKET_TIMEOUT;
            loop {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    break; // resend the SYN-ACK
                };
                match timeout(remaining, socket.recv_from()).await {
                    Err(_elapsed) => break,
                    Ok(Err(SocketError::Packet(_))) => continue,
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok((pkt, addr))) => {
                        if addr != peer || !pkt.verify() {
                            continue;
                        }
                        if pkt.is_syn() {
                            // Our SYN-ACK was lost; answer the duplicate SYN.
                            break;
                        }
                        if pkt.is_ack() && pkt.payload.is_empty() && !pkt.is_fin() {
                            established = true;
                            break 'attempts;
                        }
                        // Data or FIN: the final ACK was lost but the sender
                        // has moved on — the connection is up.
                        pending = Some(pkt);
                        established = true;
                        break 'attempts;
                    }
                }
            }
        }

        if !established {
            log::warn!("[rcv] no final ACK from {peer}; handshake abandoned");
            return Err(ConnError::HandshakeFailed);
        }

        state = ConnectionState::Established;
        log::debug!("[rcv] {state} with {peer}");
        Ok(Self {
            state,
            socket,
            peer,
            pending,
        })
    }

    /// Decompose into raw parts for the transfer drivers.
    pub fn into_parts(self) -> (Socket, SocketAddr, ConnectionState, Option<Packet>) {
        (self.socket, self.peer, self.state, self.pending)
    }
}

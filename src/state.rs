//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a connection can occupy.  The transfer is
//! unidirectional, so the lifecycle is a straight line through the TCP state
//! diagram rather than the full RFC 793 lattice:
//!
//! ```text
//!  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED ──FIN sent──▶ FIN_WAIT ──▶ CLOSED
//!     │
//!     └──bind──▶ LISTEN ──SYN rcvd, ACK rcvd──▶ ESTABLISHED ──FIN rcvd──▶ CLOSED
//! ```
//!
//! State transitions live in [`crate::connection`], [`crate::sender`], and
//! [`crate::receiver`]; keeping the types separate makes it easy to add
//! guard logic or tracing without touching protocol plumbing.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// Passive side bound and waiting for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN has been sent; waiting for the FIN-ACK.
    FinWait,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

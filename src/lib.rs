//! `udp-file-transfer` — reliable file transfer over plain UDP.
//!
//! UDP may drop, duplicate, reorder, or corrupt datagrams.  This crate
//! layers a small transport on top that delivers an ordered, gap-free,
//! checksummed byte stream from a sender to a receiver.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   data packets    ┌──────────────┐
//!  │ FileSender │──────────────────▶│ FileReceiver │
//!  └────┬───────┘                   └──────┬───────┘
//!       │        cumulative ACKs          │
//!       │◀──────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────────┐
//!  │ send window + RenoController          │
//!  │ (one mutex, fed by the ACK task)      │
//!  └────┬──────────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (serialise / deserialise / checksum)
//! - [`socket`]     — async UDP socket abstraction
//! - [`state`]      — finite-state-machine types
//! - [`connection`] — three-way establishment, active and passive
//! - [`reno`]       — TCP Reno congestion controller
//! - [`sender`]     — sliding window, retransmission, ACK receiver task
//! - [`receiver`]   — in-order delivery with a selective receive buffer
//! - [`simulator`]  — lossy/reordering relay for testing

use std::time::Duration;

pub mod connection;
pub mod packet;
pub mod receiver;
pub mod reno;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;

pub use connection::{ConnError, Connection};
pub use packet::Packet;
pub use receiver::{FileReceiver, ReceiveStats};
pub use sender::{FileSender, TransferStats};
pub use simulator::{Router, SimulatorConfig};
pub use socket::Socket;

/// Default port the receiver listens on.
pub const SERVER_PORT: u16 = 8888;

/// Default port of the impairment router placed in front of the receiver.
pub const ROUTER_PORT: u16 = 12345;

/// Cap on simultaneously in-flight packets, independent of `cwnd`.
pub const FLOW_CONTROL_WINDOW_SIZE: usize = 64;

/// Fixed retransmission timeout for data and control packets.
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(1000);

/// Retry cap for control packets (SYN, FIN) before giving up.
pub const MAX_RETRIES: u32 = 6;

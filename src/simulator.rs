//! Impairment router for deterministic testing.
//!
//! Real networks drop, reorder, duplicate, and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, this module provides a [`Router`]: a UDP relay that sits
//! between the sender and the receiver and applies a configurable fault
//! model to every datagram, in both directions:
//!
//! | Fault       | Description                                           |
//! |-------------|-------------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.         |
//! | Duplication | Deliver a datagram twice.                             |
//! | Reordering  | Hold a datagram back until the next one passes (a     |
//! |             | two-packet swap).                                     |
//! | Corruption  | Flip one random bit in the datagram.                  |
//!
//! The fault RNG is seeded, so a given configuration produces the same
//! fault sequence on every run.  The relay learns the client address from
//! the first datagram it sees and forwards everything else from upstream
//! back to it.

use std::io;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::packet::MAX_BUFFER_SIZE;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.  The default is a
/// transparent pass-through.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is held back and swapped with the next.
    pub reorder_rate: f64,
    /// Probability that one random bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// Seed for the fault RNG; a fixed seed reproduces the fault sequence.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// A fault-injecting UDP relay between one client and one upstream peer.
pub struct Router {
    /// Address the relay listens on (resolved after bind).
    pub local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Router {
    /// Bind `listen` and start relaying to `upstream` in a background task.
    pub async fn spawn(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: SimulatorConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        let local_addr = socket.local_addr()?;
        log::info!("[router] relaying {local_addr} ⇄ {upstream}");
        let handle = tokio::spawn(relay_loop(socket, upstream, config));
        Ok(Self { local_addr, handle })
    }

    /// Stop the relay.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Run until the relay task stops (it never stops on its own).
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn relay_loop(socket: UdpSocket, upstream: SocketAddr, config: SimulatorConfig) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut client: Option<SocketAddr> = None;
    // At most one datagram is held back at a time; releasing it after the
    // next same-direction send yields the two-packet swap.
    let mut held: Option<(Vec<u8>, SocketAddr)> = None;
    let mut buf = [0u8; MAX_BUFFER_SIZE];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("[router] recv failed: {e}");
                continue;
            }
        };
        let mut datagram = buf[..n].to_vec();

        let dest = if from == upstream {
            match client {
                Some(addr) => addr,
                None => continue, // upstream spoke first; nowhere to forward
            }
        } else {
            client = Some(from);
            upstream
        };

        if rng.gen::<f64>() < config.loss_rate {
            log::debug!("[router] dropped {n} byte(s) for {dest}");
            continue;
        }

        if !datagram.is_empty() && rng.gen::<f64>() < config.corrupt_rate {
            let bit = rng.gen_range(0..datagram.len() * 8);
            datagram[bit / 8] ^= 1 << (bit % 8);
            log::debug!("[router] flipped bit {bit} of a datagram for {dest}");
        }

        if held.is_none() && rng.gen::<f64>() < config.reorder_rate {
            log::debug!("[router] holding a datagram back for reordering");
            held = Some((datagram, dest));
            continue;
        }

        if let Err(e) = socket.send_to(&datagram, dest).await {
            log::warn!("[router] send failed: {e}");
        }

        if rng.gen::<f64>() < config.duplicate_rate {
            log::debug!("[router] duplicating a datagram for {dest}");
            let _ = socket.send_to(&datagram, dest).await;
        }

        if matches!(held.as_ref(), Some((_, delayed_dest)) if *delayed_dest == dest) {
            if let Some((delayed, delayed_dest)) = held.take() {
                let _ = socket.send_to(&delayed, delayed_dest).await;
            }
        }
    }
}

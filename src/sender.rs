//! Send-side engine: sliding window, retransmission, and the ACK task.
//!
//! The sender runs exactly two concurrent units:
//!
//! - the **main loop** ([`FileSender::send_bytes`]): drains the
//!   fast-retransmit signal, scans the window for timed-out packets, admits
//!   new data up to the effective window, then parks in a bounded wait;
//! - the **ACK receiver task** ([`ack_receiver_loop`]): reads datagrams off
//!   the shared socket and feeds cumulative/duplicate ACK events to the
//!   [`RenoController`] and the window.
//!
//! Everything they share — the window, `send_base`, `next_seq`, the Reno
//! state, the fast-retransmit target, the counters — lives in one
//! [`SenderState`] behind a single mutex.  A [`Notify`] plays the condition
//! variable: ACK progress and the fast-retransmit signal cut the main
//! loop's 10 ms wait short.  The mutex is never held across an `await`;
//! datagrams are collected under the lock and sent after release.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::connection::{ConnError, Connection};
use crate::packet::{Packet, MAX_DATA_SIZE};
use crate::reno::RenoController;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::{MAX_RETRIES, PACKET_TIMEOUT};

/// Upper bound on one main-loop park; ACKs and fast retransmit wake it early.
const MAIN_LOOP_WAIT: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// TransferStats
// ---------------------------------------------------------------------------

/// Counters reported to the caller when the transfer completes.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Distinct data packets sent (excludes retransmissions).
    pub packets_sent: u32,
    /// Retransmissions, both timeout-driven and fast.
    pub retransmissions: u32,
    /// Valid acknowledgements consumed by the ACK task.
    pub acks_received: u32,
    /// Wall-clock time from ESTABLISHED to close.
    pub elapsed: Duration,
}

impl TransferStats {
    /// Retransmissions as a percentage of packets sent.
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            f64::from(self.retransmissions) / f64::from(self.packets_sent) * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// SenderState — everything behind the one mutex
// ---------------------------------------------------------------------------

/// One in-flight packet awaiting cumulative acknowledgement.
#[derive(Debug)]
struct WindowEntry {
    /// The encoded datagram, ready to resend as-is.
    datagram: Vec<u8>,
    /// Time of the most recent transmission, for the timeout scan.
    sent_at: Instant,
}

/// Send-side shared state: window, sequence cursors, congestion control.
///
/// Entries leave `window` exactly when cumulatively acknowledged, so
/// membership itself is the "unacked" flag.
#[derive(Debug)]
struct SenderState {
    /// In-flight packets keyed by sequence number.
    window: BTreeMap<u32, WindowEntry>,
    /// Lowest unacknowledged sequence number.
    send_base: u32,
    /// Sequence number for the next new data packet.
    next_seq: u32,
    reno: RenoController,
    /// Sequence the ACK task asked the main loop to resend immediately.
    fast_retransmit: Option<u32>,
    /// Set by the main loop once all data is acknowledged.
    transmission_complete: bool,
    /// Set by the ACK task when the FIN-ACK arrives.
    fin_acked: bool,
    stats: TransferStats,
}

impl SenderState {
    fn new() -> Self {
        Self {
            window: BTreeMap::new(),
            send_base: 1,
            next_seq: 1,
            reno: RenoController::new(),
            fast_retransmit: None,
            transmission_complete: false,
            fin_acked: false,
            stats: TransferStats::default(),
        }
    }

    /// Dispatch one cumulative acknowledgement.
    ///
    /// Returns `true` when the main loop should be woken: either the window
    /// advanced (room for new data) or a fast retransmit was signalled.
    fn handle_ack(&mut self, ack_num: u32) -> bool {
        if ack_num >= self.next_seq {
            // Acknowledges data never sent; ignore.
            return false;
        }
        if ack_num >= self.send_base {
            self.send_base = ack_num + 1;
            self.window = self.window.split_off(&self.send_base);
            self.reno.on_new_ack();
            true
        } else if self.reno.on_dup_ack() {
            self.fast_retransmit = Some(self.send_base);
            true
        } else {
            false
        }
    }

    /// Steps 1–2 of the main loop: fast retransmit takes precedence over
    /// the timeout scan within a single pass.
    fn collect_retransmissions(&mut self, outgoing: &mut Vec<Vec<u8>>) {
        if let Some(target) = self.fast_retransmit.take() {
            if let Some(entry) = self.window.get_mut(&target) {
                entry.sent_at = Instant::now();
                outgoing.push(entry.datagram.clone());
                self.stats.retransmissions += 1;
                log::debug!("[snd] fast retransmit seq={target}");
                return;
            }
            // Target already acknowledged; fall through to the scan.
        }

        let now = Instant::now();
        let Self {
            window,
            reno,
            stats,
            ..
        } = self;
        for (&seq, entry) in window.iter_mut() {
            if now.duration_since(entry.sent_at) > PACKET_TIMEOUT {
                entry.sent_at = now;
                outgoing.push(entry.datagram.clone());
                stats.retransmissions += 1;
                reno.on_timeout();
                log::debug!("[snd] timeout retransmit seq={seq}, back to slow start");
            }
        }
    }

    /// Step 3: cut and admit new packets while the effective window has
    /// room.  Returns the advanced input cursor.
    fn admit_new_data(
        &mut self,
        data: &[u8],
        mut cursor: usize,
        outgoing: &mut Vec<Vec<u8>>,
    ) -> usize {
        while self.window.len() < self.reno.effective_window() && cursor < data.len() {
            let end = (cursor + MAX_DATA_SIZE).min(data.len());
            let pkt = Packet::data(self.next_seq, data[cursor..end].to_vec());
            let datagram = pkt.encode();
            log::debug!(
                "[snd] → DATA seq={} len={} cwnd={:.1} ssthresh={}",
                self.next_seq,
                end - cursor,
                self.reno.cwnd(),
                self.reno.ssthresh()
            );
            outgoing.push(datagram.clone());
            self.window.insert(
                self.next_seq,
                WindowEntry {
                    datagram,
                    sent_at: Instant::now(),
                },
            );
            self.stats.packets_sent += 1;
            self.next_seq += 1;
            cursor = end;
        }
        cursor
    }
}

// ---------------------------------------------------------------------------
// AckReceiverTask
// ---------------------------------------------------------------------------

/// Background task: consume acknowledgements until the FIN-ACK or an I/O
/// failure.
///
/// Checksum-invalid and non-ACK datagrams are dropped without reply.
async fn ack_receiver_loop(socket: Arc<Socket>, peer: SocketAddr, shared: Arc<Shared>) {
    loop {
        let (pkt, addr) = match socket.recv_from().await {
            Ok(received) => received,
            Err(SocketError::Packet(e)) => {
                log::debug!("[snd] undecodable datagram dropped: {e}");
                continue;
            }
            Err(SocketError::Io(e)) => {
                log::warn!("[snd] ACK task stopping on socket error: {e}");
                break;
            }
        };
        if addr != peer || !pkt.verify() || !pkt.is_ack() {
            continue;
        }

        let mut st = shared.state.lock().unwrap();
        st.stats.acks_received += 1;

        if pkt.is_fin() {
            st.fin_acked = true;
            shared.wake.notify_one();
            log::debug!("[snd] ← FIN-ACK");
            break;
        }

        if st.transmission_complete && st.window.is_empty() {
            // Stale ACK during teardown; keep draining until the FIN-ACK.
            continue;
        }

        log::debug!("[snd] ← ACK ack={}", pkt.ack_num);
        if st.handle_ack(pkt.ack_num) {
            shared.wake.notify_one();
        }
    }
}

struct Shared {
    state: Mutex<SenderState>,
    /// Condition-variable stand-in: wakes the main loop out of its park.
    wake: Notify,
}

// ---------------------------------------------------------------------------
// FileSender
// ---------------------------------------------------------------------------

/// Send side of one file transfer.
pub struct FileSender {
    /// Current FSM state.
    pub state: ConnectionState,
    socket: Arc<Socket>,
    peer: SocketAddr,
    shared: Arc<Shared>,
    ack_task: JoinHandle<()>,
    started: Instant,
}

impl FileSender {
    /// Perform an active open against `peer` and start the ACK task.
    pub async fn connect(socket: Socket, peer: SocketAddr) -> Result<Self, ConnError> {
        let conn = Connection::connect(socket, peer).await?;
        let (socket, peer, state, _pending) = conn.into_parts();
        let socket = Arc::new(socket);
        let shared = Arc::new(Shared {
            state: Mutex::new(SenderState::new()),
            wake: Notify::new(),
        });
        let ack_task = tokio::spawn(ack_receiver_loop(socket.clone(), peer, shared.clone()));
        Ok(Self {
            state,
            socket,
            peer,
            shared,
            ack_task,
            started: Instant::now(),
        })
    }

    /// Stream `data` to the peer, blocking until every byte is
    /// cumulatively acknowledged.
    ///
    /// Runs the main-loop step until the input is exhausted and the window
    /// is empty: fast retransmit first, then the timeout scan, then new-data
    /// admission, then a bounded park that ACK progress cuts short.
    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<(), ConnError> {
        let mut cursor = 0usize;
        loop {
            let mut outgoing: Vec<Vec<u8>> = Vec::new();
            {
                let mut st = self.shared.state.lock().unwrap();
                if cursor >= data.len() && st.window.is_empty() {
                    break;
                }
                st.collect_retransmissions(&mut outgoing);
                cursor = st.admit_new_data(data, cursor, &mut outgoing);
            }
            for datagram in &outgoing {
                self.socket.send_raw(datagram, self.peer).await?;
            }
            let _ = timeout(MAIN_LOOP_WAIT, self.shared.wake.notified()).await;
        }
        self.shared.state.lock().unwrap().transmission_complete = true;
        Ok(())
    }

    /// Tear the connection down: FIN with bounded retries, then reap the
    /// ACK task and report the transfer statistics.
    ///
    /// If no FIN-ACK arrives within the retry budget the connection is
    /// force-closed — all data is already acknowledged by this point, only
    /// the goodbye is lossy.
    pub async fn close(mut self) -> Result<TransferStats, ConnError> {
        let fin_seq = {
            let mut st = self.shared.state.lock().unwrap();
            st.transmission_complete = true;
            st.next_seq
        };
        let fin = Packet::fin(fin_seq).encode();
        self.state = ConnectionState::FinWait;

        let mut acked = false;
        'attempts: for attempt in 0..=MAX_RETRIES {
            self.socket.send_raw(&fin, self.peer).await?;
            log::debug!("[snd] → FIN seq={fin_seq} (attempt {})", attempt + 1);

            let deadline = Instant::now() + PACKET_TIMEOUT;
            loop {
                if self.shared.state.lock().unwrap().fin_acked {
                    acked = true;
                    break 'attempts;
                }
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    break; // resend the FIN
                };
                let _ = timeout(remaining, self.shared.wake.notified()).await;
            }
        }

        if acked {
            let _ = self.ack_task.await;
            log::info!("[snd] connection closed");
        } else {
            log::warn!("[snd] FIN not acknowledged; force-closing");
            self.ack_task.abort();
        }
        self.state = ConnectionState::Closed;

        let mut st = self.shared.state.lock().unwrap();
        st.stats.elapsed = self.started.elapsed();
        Ok(st.stats.clone())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

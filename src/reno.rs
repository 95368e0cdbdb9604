//! TCP Reno congestion controller.
//!
//! [`RenoController`] owns the congestion window, the slow-start threshold,
//! the Reno state, and the duplicate-ACK counter.  It consumes three events —
//! new cumulative ACK, duplicate ACK, retransmission timeout — and produces
//! the current effective window.
//!
//! ```text
//!              new ACK, cwnd ≥ ssthresh
//!  SLOW_START ─────────────────────────▶ CONGESTION_AVOIDANCE
//!      ▲  ▲                                   │        ▲
//!      │  └────────── timeout ────────────────┤        │ new ACK
//!      │                                      ▼        │
//!      └────── timeout ──────────────── FAST_RECOVERY ─┘
//!                                       (3 duplicate ACKs)
//! ```
//!
//! This module only manages state; window bookkeeping and socket I/O are the
//! caller's responsibility (see [`crate::sender`]).

/// The three Reno states governing `cwnd` growth and reaction to loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    /// Exponential growth: `cwnd += 1` per new ACK.
    SlowStart,
    /// Additive growth: `cwnd += 1/cwnd` per new ACK.
    CongestionAvoidance,
    /// Entered on the third duplicate ACK; window inflates per duplicate.
    FastRecovery,
}

/// Reno congestion-control state for one connection.
///
/// `cwnd` is fractional so the additive `1/cwnd` increase accumulates; it
/// never drops below 1.0, and `ssthresh` never drops below 2.
#[derive(Debug, Clone)]
pub struct RenoController {
    cwnd: f64,
    ssthresh: u32,
    state: CongestionState,
    dup_ack_count: u32,
}

impl Default for RenoController {
    fn default() -> Self {
        Self::new()
    }
}

impl RenoController {
    pub fn new() -> Self {
        Self {
            cwnd: 1.0,
            ssthresh: 16,
            state: CongestionState::SlowStart,
            dup_ack_count: 0,
        }
    }

    /// Congestion window, in packets.
    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn state(&self) -> CongestionState {
        self.state
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.dup_ack_count
    }

    /// Cap on in-flight packets: `min(FLOW_CONTROL_WINDOW_SIZE, ⌊cwnd⌋)`.
    pub fn effective_window(&self) -> usize {
        (self.cwnd.floor() as usize).min(crate::FLOW_CONTROL_WINDOW_SIZE)
    }

    /// A cumulative ACK advanced the window.
    pub fn on_new_ack(&mut self) {
        self.dup_ack_count = 0;
        match self.state {
            CongestionState::FastRecovery => {
                // Recovery complete: deflate back to the threshold.
                self.state = CongestionState::CongestionAvoidance;
                self.cwnd = f64::from(self.ssthresh);
            }
            CongestionState::SlowStart => {
                self.cwnd += 1.0;
                if self.cwnd >= f64::from(self.ssthresh) {
                    self.state = CongestionState::CongestionAvoidance;
                }
            }
            CongestionState::CongestionAvoidance => {
                self.cwnd += 1.0 / self.cwnd;
            }
        }
    }

    /// An ACK repeated the pre-window cumulative position.
    ///
    /// Returns `true` exactly when this is the third duplicate and the
    /// caller must fast-retransmit `send_base`.  Further duplicates while in
    /// fast recovery only inflate the window.
    pub fn on_dup_ack(&mut self) -> bool {
        self.dup_ack_count += 1;
        if self.state == CongestionState::FastRecovery {
            self.cwnd += 1.0;
            false
        } else if self.dup_ack_count == 3 {
            self.state = CongestionState::FastRecovery;
            self.ssthresh = (self.cwnd / 2.0).max(2.0) as u32;
            self.cwnd = f64::from(self.ssthresh) + 3.0;
            true
        } else {
            false
        }
    }

    /// A packet sat unacknowledged past the retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(2.0) as u32;
        self.cwnd = 1.0;
        self.state = CongestionState::SlowStart;
        self.dup_ack_count = 0;
    }
}

//! ICMP destination-unreachable accounting.
//!
//! The monitor is a pure signal counter with no retry policy of its own. One
//! counter covers a whole episode: signals seen while the session is
//! nominally open and signals seen during reconnect attempts land in the
//! same count, since both mean the peer cannot be reached.

use std::net::SocketAddr;

use tokio::time::Instant;

/// Counts unreachable signals for one peer.
#[derive(Debug, Clone)]
pub struct IcmpFailureMonitor {
    peer: SocketAddr,
    count: u32,
    lifetime_total: u64,
    last_signal: Option<Instant>,
}

impl IcmpFailureMonitor {
    /// Create a monitor for `peer`.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            count: 0,
            lifetime_total: 0,
            last_signal: None,
        }
    }

    /// Record an unreachable signal. Returns the new episode count.
    ///
    /// Signals about any other address are ignored.
    pub fn on_icmp_unreachable(&mut self, peer: SocketAddr) -> u32 {
        if peer != self.peer {
            return self.count;
        }
        self.count = self.count.saturating_add(1);
        self.lifetime_total = self.lifetime_total.saturating_add(1);
        self.last_signal = Some(Instant::now());
        self.count
    }

    /// Signals in the current episode.
    pub fn current_count(&self) -> u32 {
        self.count
    }

    /// Close the episode after a fully successful reconnect.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Signals since the monitor was created.
    pub fn lifetime_total(&self) -> u64 {
        self.lifetime_total
    }

    /// When the last signal arrived.
    pub fn last_signal(&self) -> Option<Instant> {
        self.last_signal
    }

    /// The monitored peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Follow the session to a new peer address; starts a new episode.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        if peer != self.peer {
            self.peer = peer;
            self.count = 0;
        }
    }
}

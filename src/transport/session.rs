//! Transport session: connection state and DTLS handshake scheduling.
//!
//! The session wraps a [`TransportIo`] and owns its lifecycle:
//!
//! ```text
//!   CLOSED ──begin_attempt──► CONNECTING ──open ok──► HANDSHAKING ──done──► OPEN
//!     ▲                           │         (DTLS)         │                 │
//!     └──────── close ◄───────────┴────────────────────────┴─────────────────┘
//!   FAILED: retries exhausted, waits for an explicit reconnect
//! ```
//!
//! Handshake flights are paced by [`HandshakeBackoff`], independently of the
//! CoAP retransmission schedule.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::error::{HandshakeError, TransportError, TransportResult};
use super::io::{Incoming, SecurityMode, TransportIo};
use super::message::{InboundMessage, OutboundMessage};
use crate::core::RetransmissionParameters;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Closed,
    /// Opening a socket.
    Connecting,
    /// DTLS handshake in progress.
    Handshaking,
    /// Traffic can flow.
    Open,
    /// Automatic retries exhausted.
    Failed,
}

/// Handshake flight timeouts: `min`, doubling, never beyond `max`.
#[derive(Debug, Clone)]
pub struct HandshakeBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
    flights: u32,
}

impl HandshakeBackoff {
    /// Create a backoff window.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
            flights: 1,
        }
    }

    /// Restart at the first flight.
    pub fn reset(&mut self) {
        self.current = self.min;
        self.flights = 1;
    }

    /// Timeout of the current flight.
    pub fn current_wait(&self) -> Duration {
        self.current
    }

    /// Flights sent so far, including the current one.
    pub fn flights(&self) -> u32 {
        self.flights
    }

    /// The current flight timed out. Returns the next wait, or `None` once
    /// doubling would exceed `max`.
    pub fn on_flight_timeout(&mut self) -> Option<Duration> {
        let next = self.current.saturating_mul(2);
        if next > self.max {
            return None;
        }
        self.current = next;
        self.flights += 1;
        Some(next)
    }
}

/// What the session produced while being polled.
#[derive(Debug)]
pub enum SessionEvent {
    /// A message from the peer.
    Message(InboundMessage),
    /// An unreachable signal, from receive or from a handshake flight.
    Unreachable,
    /// The DTLS handshake completed; the session is open.
    HandshakeComplete,
    /// A handshake flight timed out; the next one waits `wait`.
    HandshakeRetry {
        /// Timeout of the next flight.
        wait: Duration,
    },
    /// The handshake gave up or was rejected.
    HandshakeFailed(TransportError),
    /// Any other transport failure.
    Error(TransportError),
}

/// A transport session to one peer.
#[derive(Debug)]
pub struct TransportSession<T> {
    io: T,
    state: ConnectionState,
    handshake: HandshakeBackoff,
    flight_deadline: Option<Instant>,
}

impl<T: TransportIo> TransportSession<T> {
    /// Wrap a transport. The session starts closed.
    pub fn new(io: T, params: &RetransmissionParameters) -> Self {
        Self {
            io,
            state: ConnectionState::Closed,
            handshake: HandshakeBackoff::new(
                params.dtls_retry_wait_min,
                params.dtls_retry_wait_max,
            ),
            flight_deadline: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether traffic can flow.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Plaintext or DTLS.
    pub fn security_mode(&self) -> SecurityMode {
        self.io.security_mode()
    }

    /// Peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.io.peer_addr()
    }

    /// Local address, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.io.local_addr()
    }

    /// The wrapped transport.
    pub fn io(&self) -> &T {
        &self.io
    }

    /// Close the prior socket and open a new one.
    ///
    /// Plaintext sessions are open on return; DTLS sessions move to
    /// [`ConnectionState::Handshaking`] and finish in [`next_event`](Self::next_event).
    pub async fn begin_attempt(&mut self) -> TransportResult<()> {
        self.io.close();
        self.state = ConnectionState::Connecting;

        if let Err(err) = self.io.open().await {
            self.state = ConnectionState::Closed;
            return Err(err);
        }

        match self.io.security_mode() {
            SecurityMode::None => self.state = ConnectionState::Open,
            SecurityMode::Dtls => {
                self.handshake.reset();
                self.flight_deadline = Some(Instant::now() + self.handshake.current_wait());
                self.state = ConnectionState::Handshaking;
            }
        }
        Ok(())
    }

    /// Close the socket.
    pub fn close(&mut self) {
        self.io.close();
        self.flight_deadline = None;
        self.state = ConnectionState::Closed;
    }

    /// Close the socket and stay down until an explicit reconnect.
    pub fn mark_failed(&mut self) {
        self.close();
        self.state = ConnectionState::Failed;
    }

    /// Send on an open session.
    pub async fn send(&mut self, message: &OutboundMessage) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.io.send(message).await
    }

    /// Wait for the next event in the current state.
    ///
    /// Open sessions receive, handshaking sessions drive the handshake with
    /// the flight timeout; any other state never completes. Cancel-safe as
    /// long as the transport is.
    pub async fn next_event(&mut self) -> SessionEvent {
        match self.state {
            ConnectionState::Open => match self.io.receive().await {
                Ok(Incoming::Message(message)) => SessionEvent::Message(message),
                Ok(Incoming::Unreachable) => SessionEvent::Unreachable,
                Err(err) if err.is_unreachable() => SessionEvent::Unreachable,
                Err(err) => SessionEvent::Error(err),
            },
            ConnectionState::Handshaking => self.drive_handshake().await,
            _ => std::future::pending().await,
        }
    }

    async fn drive_handshake(&mut self) -> SessionEvent {
        let deadline = *self
            .flight_deadline
            .get_or_insert_with(|| Instant::now() + self.handshake.current_wait());

        match timeout_at(deadline, self.io.handshake()).await {
            Ok(Ok(())) => {
                self.flight_deadline = None;
                self.state = ConnectionState::Open;
                SessionEvent::HandshakeComplete
            }
            Ok(Err(HandshakeError::Unreachable)) => SessionEvent::Unreachable,
            Ok(Err(err)) => SessionEvent::HandshakeFailed(TransportError::Handshake(err)),
            Err(_elapsed) => match self.handshake.on_flight_timeout() {
                Some(wait) => {
                    debug!(
                        peer = %self.io.peer_addr(),
                        flight = self.handshake.flights(),
                        wait_ms = wait.as_millis() as u64,
                        "handshake flight timed out"
                    );
                    self.flight_deadline = Some(deadline + wait);
                    SessionEvent::HandshakeRetry { wait }
                }
                None => SessionEvent::HandshakeFailed(TransportError::HandshakeExhausted {
                    flights: self.handshake.flights(),
                }),
            },
        }
    }
}

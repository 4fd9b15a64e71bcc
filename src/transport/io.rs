//! The transport capability consumed by the session.
//!
//! Plaintext UDP and DTLS differ only in whether [`TransportIo::handshake`]
//! does any work, so a single trait selected at construction covers both.

use std::net::SocketAddr;

use async_trait::async_trait;

use super::error::{HandshakeError, TransportResult};
use super::message::{InboundMessage, OutboundMessage};

/// Security mode of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Plaintext CoAP over UDP.
    None,
    /// CoAP over DTLS; a handshake must complete before traffic flows.
    Dtls,
}

/// Something received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A decoded message from the peer.
    Message(InboundMessage),
    /// An ICMP destination-unreachable for the peer.
    Unreachable,
}

/// Datagram I/O towards a single peer.
///
/// `receive` and `handshake` are raced against timers and commands, so both
/// must be cancel-safe: dropping the future must not lose a datagram, and
/// calling `handshake` again continues the handshake in progress.
#[async_trait]
pub trait TransportIo: Send {
    /// Plaintext or DTLS.
    fn security_mode(&self) -> SecurityMode;

    /// Address of the peer.
    fn peer_addr(&self) -> SocketAddr;

    /// Bound local address, if open.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Open a fresh socket towards the peer.
    async fn open(&mut self) -> TransportResult<()>;

    /// Close the socket, dropping any per-connection state.
    fn close(&mut self);

    /// Send one message.
    async fn send(&mut self, message: &OutboundMessage) -> TransportResult<()>;

    /// Wait for the next message or unreachable signal.
    async fn receive(&mut self) -> TransportResult<Incoming>;

    /// Drive the DTLS handshake until the peer answers the current flight.
    ///
    /// The caller bounds each call with the flight timeout. Plaintext
    /// transports complete immediately.
    async fn handshake(&mut self) -> Result<(), HandshakeError> {
        Ok(())
    }
}

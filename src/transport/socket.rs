//! Plaintext CoAP over a connected tokio UDP socket.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use super::codec;
use super::error::{TransportError, TransportResult, is_unreachable_kind};
use super::io::{Incoming, SecurityMode, TransportIo};
use super::message::OutboundMessage;

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1500;

/// UDP transport towards one peer.
///
/// Every [`open`](TransportIo::open) binds a fresh socket and connects it to
/// the peer, so a reconnect gets a new local port. Connecting lets the kernel
/// report ICMP unreachables on the socket, which surface as
/// [`Incoming::Unreachable`].
#[derive(Debug)]
pub struct UdpTransport {
    bind: SocketAddr,
    peer: SocketAddr,
    socket: Option<UdpSocket>,
    recv_buffer: Vec<u8>,
}

impl UdpTransport {
    /// Create a transport to `peer`, binding an ephemeral port on each open.
    pub fn new(peer: SocketAddr) -> Self {
        UdpTransportBuilder::new().build(peer)
    }

    /// Start a builder.
    pub fn builder() -> UdpTransportBuilder {
        UdpTransportBuilder::new()
    }

    fn socket(&self) -> TransportResult<&UdpSocket> {
        self.socket.as_ref().ok_or(TransportError::NotOpen)
    }
}

#[async_trait]
impl TransportIo for UdpTransport {
    fn security_mode(&self) -> SecurityMode {
        SecurityMode::None
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    async fn open(&mut self) -> TransportResult<()> {
        self.socket = None;
        let socket = UdpSocket::bind(self.bind).await.map_err(TransportError::from_io)?;
        socket.connect(self.peer).await.map_err(TransportError::from_io)?;
        debug!(peer = %self.peer, local = ?socket.local_addr().ok(), "udp socket opened");
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(peer = %self.peer, "udp socket closed");
        }
    }

    async fn send(&mut self, message: &OutboundMessage) -> TransportResult<()> {
        let datagram = codec::encode(message);
        self.socket()?
            .send(&datagram)
            .await
            .map_err(TransportError::from_io)?;
        Ok(())
    }

    async fn receive(&mut self) -> TransportResult<Incoming> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        loop {
            let len = match socket.recv(&mut self.recv_buffer).await {
                Ok(len) => len,
                Err(err) if is_unreachable_kind(err.kind()) => return Ok(Incoming::Unreachable),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            match codec::decode(&self.recv_buffer[..len]) {
                Ok(message) => return Ok(Incoming::Message(message)),
                Err(err) => {
                    debug!(peer = %self.peer, len, error = %err, "dropping undecodable datagram");
                }
            }
        }
    }
}

/// Builder for [`UdpTransport`].
#[derive(Debug, Clone)]
pub struct UdpTransportBuilder {
    bind: SocketAddr,
    recv_buffer_size: usize,
}

impl Default for UdpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpTransportBuilder {
    /// Ephemeral IPv4 port, default buffer.
    pub fn new() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    /// Local address to bind on each open.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Build a transport to `peer`.
    pub fn build(self, peer: SocketAddr) -> UdpTransport {
        UdpTransport {
            bind: self.bind,
            peer,
            socket: None,
            recv_buffer: vec![0u8; self.recv_buffer_size],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InboundMessage, MessageId, MessageType, Token, codes};
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn con(mid: u16) -> OutboundMessage {
        OutboundMessage {
            message_type: MessageType::Confirmable,
            code: codes::POST,
            message_id: MessageId(mid),
            token: Token(7),
            payload: b"hello".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_send_and_receive_ack() {
        let server = UdpSocket::bind(loopback()).await.unwrap();
        let mut transport = UdpTransport::builder()
            .bind(loopback())
            .build(server.local_addr().unwrap());

        transport.open().await.unwrap();
        let local = transport.local_addr().unwrap();
        transport.send(&con(0x42)).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, local);
        assert_eq!(&buf[len - 5..len], b"hello");

        // empty ACK echoing the message id
        server.send_to(&[0x60, 0x00, 0x00, 0x42], from).await.unwrap();
        let incoming = transport.receive().await.unwrap();
        assert_eq!(incoming, Incoming::Message(InboundMessage::ack(MessageId(0x42))));
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let server = UdpSocket::bind(loopback()).await.unwrap();
        let mut transport = UdpTransport::builder()
            .bind(loopback())
            .build(server.local_addr().unwrap());
        transport.open().await.unwrap();
        transport.send(&con(1)).await.unwrap();

        let mut buf = [0u8; 64];
        let (_, from) = server.recv_from(&mut buf).await.unwrap();
        server.send_to(&[0xFF], from).await.unwrap();
        server.send_to(&[0x70, 0x00, 0x00, 0x01], from).await.unwrap();

        let incoming = transport.receive().await.unwrap();
        assert_eq!(incoming, Incoming::Message(InboundMessage::reset(MessageId(1))));
    }

    #[tokio::test]
    async fn test_reopen_changes_socket() {
        let server = UdpSocket::bind(loopback()).await.unwrap();
        let mut transport = UdpTransport::builder()
            .bind(loopback())
            .build(server.local_addr().unwrap());

        transport.open().await.unwrap();
        let first = transport.local_addr().unwrap();
        transport.close();
        assert!(transport.local_addr().is_none());
        assert!(matches!(transport.send(&con(1)).await, Err(TransportError::NotOpen)));

        transport.open().await.unwrap();
        assert_ne!(transport.local_addr().unwrap(), first);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_closed_port_reports_unreachable() {
        let peer = {
            let gone = UdpSocket::bind(loopback()).await.unwrap();
            gone.local_addr().unwrap()
        };
        let mut transport = UdpTransport::builder().bind(loopback()).build(peer);
        transport.open().await.unwrap();

        // the kernel reports the port unreachable on the following recv or send
        let mut seen = false;
        for mid in 0..3 {
            match transport.send(&con(mid)).await {
                Err(err) if err.is_unreachable() => {
                    seen = true;
                    break;
                }
                Err(err) => panic!("unexpected error {err}"),
                Ok(()) => {}
            }
            if let Ok(Ok(Incoming::Unreachable)) =
                tokio::time::timeout(Duration::from_millis(200), transport.receive()).await
            {
                seen = true;
                break;
            }
        }
        assert!(seen);
    }
}

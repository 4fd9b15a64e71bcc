//! Fault injection around a transport.
//!
//! [`FaultInjector`] wraps any [`TransportIo`] and consults a [`FaultPolicy`]
//! before each send, open and handshake flight. It is how the reconnect paths
//! are exercised without a real network outage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::trace;

use super::error::{HandshakeError, TransportError, TransportResult};
use super::io::{Incoming, SecurityMode, TransportIo};
use super::message::OutboundMessage;

/// What happens to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Pass through.
    Deliver,
    /// Swallow silently.
    Drop,
    /// Fail with an ICMP unreachable.
    Unreachable,
}

/// Decides the fate of each operation.
pub trait FaultPolicy: Send + Sync {
    /// Fate of an outbound message.
    fn on_send(&self, message: &OutboundMessage) -> Fault;

    /// Fate of opening the socket. `Drop` is treated as `Deliver`.
    fn on_open(&self) -> Fault {
        Fault::Deliver
    }

    /// Fate of a handshake flight.
    fn on_handshake(&self) -> Fault {
        Fault::Deliver
    }
}

/// A network partition that can be raised and healed at runtime.
///
/// While active every send and handshake flight is answered with an
/// unreachable, the way a gateway reports a dead route.
#[derive(Debug, Default)]
pub struct Partition {
    active: AtomicBool,
}

impl Partition {
    /// A healed partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cut the link.
    pub fn partition(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Restore the link.
    pub fn heal(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether the link is cut.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn fault(&self) -> Fault {
        if self.is_active() {
            Fault::Unreachable
        } else {
            Fault::Deliver
        }
    }
}

impl FaultPolicy for Partition {
    fn on_send(&self, _message: &OutboundMessage) -> Fault {
        self.fault()
    }

    fn on_handshake(&self) -> Fault {
        self.fault()
    }
}

/// Wraps a transport and applies a shared [`FaultPolicy`].
///
/// An unreachable send succeeds locally and queues the ICMP signal, which the
/// next `receive` returns. That mirrors the kernel reporting the error
/// asynchronously on a connected socket.
#[derive(Debug)]
pub struct FaultInjector<T, P> {
    inner: T,
    policy: Arc<P>,
    pending_unreachable: u32,
}

impl<T, P> FaultInjector<T, P> {
    /// Wrap `inner`, sharing `policy` with the caller.
    pub fn new(inner: T, policy: Arc<P>) -> Self {
        Self {
            inner,
            policy,
            pending_unreachable: 0,
        }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The shared policy.
    pub fn policy(&self) -> &Arc<P> {
        &self.policy
    }
}

#[async_trait]
impl<T, P> TransportIo for FaultInjector<T, P>
where
    T: TransportIo,
    P: FaultPolicy + 'static,
{
    fn security_mode(&self) -> SecurityMode {
        self.inner.security_mode()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    async fn open(&mut self) -> TransportResult<()> {
        self.pending_unreachable = 0;
        match self.policy.on_open() {
            Fault::Unreachable => Err(TransportError::Unreachable),
            Fault::Deliver | Fault::Drop => self.inner.open().await,
        }
    }

    fn close(&mut self) {
        self.pending_unreachable = 0;
        self.inner.close();
    }

    async fn send(&mut self, message: &OutboundMessage) -> TransportResult<()> {
        match self.policy.on_send(message) {
            Fault::Deliver => self.inner.send(message).await,
            Fault::Drop => {
                trace!(mid = %message.message_id, "fault: dropped");
                Ok(())
            }
            Fault::Unreachable => {
                trace!(mid = %message.message_id, "fault: unreachable");
                self.pending_unreachable += 1;
                Ok(())
            }
        }
    }

    async fn receive(&mut self) -> TransportResult<Incoming> {
        if self.pending_unreachable > 0 {
            self.pending_unreachable -= 1;
            return Ok(Incoming::Unreachable);
        }
        self.inner.receive().await
    }

    async fn handshake(&mut self) -> Result<(), HandshakeError> {
        match self.policy.on_handshake() {
            Fault::Deliver => self.inner.handshake().await,
            Fault::Drop => std::future::pending().await,
            Fault::Unreachable => Err(HandshakeError::Unreachable),
        }
    }
}

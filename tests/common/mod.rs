//! Simulated peer used by the scenario tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lwm2m_recovery::client::{SupervisorEvent, SupervisorEvents};
use lwm2m_recovery::transport::{
    HandshakeError, Incoming, InboundMessage, MessageId, OutboundMessage, SecurityMode,
    TransportError, TransportIo, TransportResult,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How the simulated peer answers confirmable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    Silent,
    Ack,
    Reset,
}

/// How the simulated peer answers handshake flights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    Complete,
    Silent,
    Reject,
}

#[derive(Debug)]
struct PeerState {
    sent: Mutex<Vec<(Instant, OutboundMessage)>>,
    responder: Mutex<Responder>,
    handshake: Mutex<HandshakeMode>,
    refusing: AtomicBool,
    opens: AtomicU32,
    handshakes: AtomicU32,
    inbox: mpsc::UnboundedSender<Incoming>,
}

/// Test-side view of the simulated peer.
#[derive(Debug, Clone)]
pub struct SimPeer {
    state: Arc<PeerState>,
}

impl SimPeer {
    pub fn set_responder(&self, responder: Responder) {
        *self.state.responder.lock().unwrap() = responder;
    }

    pub fn set_handshake(&self, mode: HandshakeMode) {
        *self.state.handshake.lock().unwrap() = mode;
    }

    /// Fail every send with an unreachable, like a connected socket after an
    /// ICMP port unreachable.
    pub fn set_refusing(&self, refusing: bool) {
        self.state.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Every datagram that reached the peer.
    pub fn sent(&self) -> Vec<(Instant, OutboundMessage)> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Send offsets relative to `start`.
    pub fn send_times(&self, start: Instant) -> Vec<Duration> {
        self.sent().iter().map(|(at, _)| *at - start).collect()
    }

    pub fn opens(&self) -> u32 {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> u32 {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    /// Deliver something to the client as if the peer sent it.
    pub fn inject(&self, incoming: Incoming) {
        let _ = self.state.inbox.send(incoming);
    }
}

/// In-memory transport whose far end is a [`SimPeer`].
#[derive(Debug)]
pub struct SimulatedLink {
    peer: SocketAddr,
    mode: SecurityMode,
    open: bool,
    state: Arc<PeerState>,
    inbox: mpsc::UnboundedReceiver<Incoming>,
}

pub fn link(mode: SecurityMode) -> (SimulatedLink, SimPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(PeerState {
        sent: Mutex::new(Vec::new()),
        responder: Mutex::new(Responder::Ack),
        handshake: Mutex::new(HandshakeMode::Complete),
        refusing: AtomicBool::new(false),
        opens: AtomicU32::new(0),
        handshakes: AtomicU32::new(0),
        inbox: tx,
    });
    let link = SimulatedLink {
        peer: SocketAddr::from(([192, 0, 2, 42], 5684)),
        mode,
        open: false,
        state: Arc::clone(&state),
        inbox: rx,
    };
    (link, SimPeer { state })
}

#[async_trait]
impl TransportIo for SimulatedLink {
    fn security_mode(&self) -> SecurityMode {
        self.mode
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.open.then(|| SocketAddr::from(([10, 0, 0, 2], 40000)))
    }

    async fn open(&mut self) -> TransportResult<()> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        // datagrams addressed to the old socket are lost
        while self.inbox.try_recv().is_ok() {}
    }

    async fn send(&mut self, message: &OutboundMessage) -> TransportResult<()> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.state.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable);
        }
        self.state
            .sent
            .lock()
            .unwrap()
            .push((Instant::now(), message.clone()));

        if message.is_confirmable() {
            let responder = *self.state.responder.lock().unwrap();
            let reply = match responder {
                Responder::Silent => None,
                Responder::Ack => Some(InboundMessage::ack(message.message_id)),
                Responder::Reset => Some(InboundMessage::reset(message.message_id)),
            };
            if let Some(reply) = reply {
                let _ = self.state.inbox.send(Incoming::Message(reply));
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> TransportResult<Incoming> {
        match self.inbox.recv().await {
            Some(incoming) => Ok(incoming),
            None => std::future::pending().await,
        }
    }

    async fn handshake(&mut self) -> Result<(), HandshakeError> {
        self.state.handshakes.fetch_add(1, Ordering::SeqCst);
        let mode = *self.state.handshake.lock().unwrap();
        match mode {
            HandshakeMode::Complete => Ok(()),
            HandshakeMode::Silent => std::future::pending().await,
            HandshakeMode::Reject => Err(HandshakeError::Rejected("unknown psk identity".into())),
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything published so far.
pub fn drain(events: &mut SupervisorEvents) -> Vec<SupervisorEvent> {
    std::iter::from_fn(|| events.try_recv()).collect()
}

/// Assert `actual` is within a millisecond of `secs`.
pub fn assert_at(actual: Duration, secs: f64) {
    let expected = Duration::from_secs_f64(secs);
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(1),
        "expected {expected:?}, got {actual:?}"
    );
}

pub fn message_ids(peer: &SimPeer) -> Vec<MessageId> {
    peer.sent().iter().map(|(_, m)| m.message_id).collect()
}

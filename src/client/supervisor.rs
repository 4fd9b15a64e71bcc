//! Reconnection supervisor: the per-peer task that owns every timer.
//!
//! One supervisor serializes all work for a peer. Its loop waits on three
//! sources and handles whichever is ready first:
//!
//! 1. commands from [`PeerHandle`](super::PeerHandle)s
//! 2. the next event of the [`TransportSession`]
//! 3. the earliest deadline (a retransmission or the next reconnect attempt)
//!
//! Failures (ICMP unreachable, a failed handshake, a registration-critical
//! exchange timing out) close the session, suspend every exchange and
//! schedule a reconnect on the backoff schedule. After `max_icmp_failures`
//! failed attempts the session is parked in [`ConnectionState::Failed`]
//! until an explicit reconnect command.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::core::{RandomSource, RetransmissionParameters};
use crate::retransmit::{
    BackoffTimer, Completed, ExchangeHandle, ExchangeKind, ExchangeOutcome, ExchangeTable,
    IcmpFailureMonitor, NotifyDecision, ObservationId, TimerEvent,
};
use crate::transport::{
    ConnectionState, InboundMessage, MessageType, OutboundMessage, SecurityMode, SessionEvent,
    TransportIo, TransportSession, codes,
};

/// Requests from handles to the supervisor task.
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        kind: RequestKind,
        payload: Vec<u8>,
        reply: oneshot::Sender<ExchangeHandle>,
    },
    Send {
        payload: Vec<u8>,
        reply: oneshot::Sender<()>,
    },
    Notify {
        observation: ObservationId,
        payload: Vec<u8>,
        reply: oneshot::Sender<NotifyReceipt>,
    },
    Reconnect,
    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What a handle may submit outside an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Request,
    Registration,
}

impl From<RequestKind> for ExchangeKind {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Request => ExchangeKind::Request,
            RequestKind::Registration => ExchangeKind::Registration,
        }
    }
}

/// How a notification value was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReceipt {
    /// Sent as a new confirmable exchange.
    Started(ExchangeHandle),
    /// Folded into the exchange already in flight for the observation.
    Coalesced(ExchangeHandle),
    /// Sent once as a non-confirmable message.
    Sent,
    /// Held until the transport is open again.
    Deferred,
}

/// Published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// An exchange reached a terminal state.
    ExchangeResult {
        /// The exchange.
        handle: ExchangeHandle,
        /// Its outcome.
        outcome: ExchangeOutcome,
    },
    /// The transport session changed state.
    StateChanged(ConnectionState),
    /// The peer is reachable again after an outage.
    Reconnected,
    /// Automatic reconnects stopped; waiting for an explicit reconnect.
    Suspended {
        /// ICMP failures counted in the current episode.
        icmp_failures: u32,
    },
    /// A message from the peer for the owner layer.
    Inbound(InboundMessage),
}

/// Snapshot of a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Transport session state.
    pub state: ConnectionState,
    /// ICMP failures in the current episode.
    pub icmp_failures: u32,
    /// ICMP failures since the supervisor started.
    pub lifetime_icmp_failures: u64,
    /// Failed reconnect attempts counted against the retry budget.
    pub failed_attempts: u32,
    /// Live confirmable exchanges.
    pub pending_exchanges: usize,
    /// Successful connections so far.
    pub connections: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureCause {
    Unreachable,
    AckTimeout,
    Handshake,
    Transport,
}

/// Drives one transport session and its exchanges.
///
/// Built by [`SupervisorBuilder`](super::SupervisorBuilder); run with
/// [`run`](Self::run), usually on its own task.
pub struct ReconnectionSupervisor<T> {
    params: RetransmissionParameters,
    backoff: BackoffTimer,
    rng: Box<dyn RandomSource>,
    session: TransportSession<T>,
    exchanges: ExchangeTable,
    icmp: IcmpFailureMonitor,
    /// When the next reconnect attempt is due.
    reconnect_at: Option<Instant>,
    /// Plaintext session opened, but the peer has not answered yet.
    awaiting_proof: bool,
    /// When a session that only flushed non-confirmable traffic counts as up.
    proof_deadline: Option<Instant>,
    failed_attempts: u32,
    connections: u64,
    reported_state: ConnectionState,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl<T: TransportIo> ReconnectionSupervisor<T> {
    pub(crate) fn new(
        params: RetransmissionParameters,
        mut rng: Box<dyn RandomSource>,
        transport: T,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let peer = transport.peer_addr();
        let exchanges = ExchangeTable::new(rng.next_u16());
        Self {
            backoff: BackoffTimer::from_parameters(&params),
            session: TransportSession::new(transport, &params),
            params,
            rng,
            exchanges,
            icmp: IcmpFailureMonitor::new(peer),
            reconnect_at: None,
            awaiting_proof: false,
            proof_deadline: None,
            failed_attempts: 0,
            connections: 0,
            reported_state: ConnectionState::Closed,
            commands,
            events,
        }
    }

    /// Peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.session.peer_addr()
    }

    /// Run until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            peer = %self.peer_addr(),
            security = ?self.session.security_mode(),
            "supervisor started"
        );
        self.attempt().await;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.shutdown();
                        break;
                    }
                },

                event = self.session.next_event() => self.on_session_event(event).await,

                () = sleep_until_some(deadline) => self.on_deadline().await,
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.reconnect_at,
            self.proof_deadline,
            self.exchanges.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                kind,
                payload,
                reply,
            } => {
                let handle = self.exchanges.create(kind.into(), payload);
                let _ = reply.send(handle);
                self.start_exchange(handle).await;
            }
            Command::Send { payload, reply } => {
                let message = self.exchanges.non_confirmable(ExchangeKind::Request, payload);
                let _ = reply.send(());
                self.transmit(message).await;
            }
            Command::Notify {
                observation,
                payload,
                reply,
            } => {
                let decision = self.exchanges.notify(
                    observation,
                    payload,
                    self.params.confirmable_notifications,
                    self.session.is_open(),
                );
                match decision {
                    NotifyDecision::Start(handle) => {
                        let _ = reply.send(NotifyReceipt::Started(handle));
                        self.start_exchange(handle).await;
                    }
                    NotifyDecision::Coalesced(handle) => {
                        debug!(observation = observation.0, exchange = %handle, "notification coalesced");
                        let _ = reply.send(NotifyReceipt::Coalesced(handle));
                    }
                    NotifyDecision::SendNon(message) => {
                        let _ = reply.send(NotifyReceipt::Sent);
                        self.transmit(message).await;
                    }
                    NotifyDecision::Deferred => {
                        let _ = reply.send(NotifyReceipt::Deferred);
                    }
                }
            }
            Command::Reconnect => {
                info!(
                    peer = %self.peer_addr(),
                    icmp_failures = self.icmp.current_count(),
                    "explicit reconnect"
                );
                self.failed_attempts = 0;
                self.attempt().await;
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.session.state(),
            icmp_failures: self.icmp.current_count(),
            lifetime_icmp_failures: self.icmp.lifetime_total(),
            failed_attempts: self.failed_attempts,
            pending_exchanges: self.exchanges.len(),
            connections: self.connections,
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(message) => self.on_inbound(message).await,
            SessionEvent::Unreachable => self.on_unreachable(),
            SessionEvent::HandshakeComplete => {
                info!(peer = %self.peer_addr(), "dtls handshake complete");
                self.on_link_up().await;
            }
            SessionEvent::HandshakeRetry { wait } => {
                debug!(peer = %self.peer_addr(), wait_ms = wait.as_millis() as u64, "retrying handshake flight");
            }
            SessionEvent::HandshakeFailed(err) => {
                warn!(peer = %self.peer_addr(), error = %err, "dtls handshake failed");
                self.on_failure(FailureCause::Handshake);
            }
            SessionEvent::Error(err) => {
                warn!(peer = %self.peer_addr(), error = %err, "transport error");
                self.on_failure(FailureCause::Transport);
            }
        }
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.attempt().await;
            return;
        }
        if !self.session.is_open() {
            return;
        }
        if self.proof_deadline.is_some_and(|at| at <= now) {
            self.proof_deadline = None;
            if self.awaiting_proof {
                // nothing came back as unreachable
                self.on_recovered();
            }
        }

        let events = self.exchanges.poll_timers(
            now,
            self.params.max_retransmit,
            &self.backoff,
            self.rng.as_mut(),
        );
        for event in events {
            match event {
                TimerEvent::Retransmit { message, attempt } => {
                    if !self.session.is_open() {
                        continue;
                    }
                    debug!(
                        peer = %self.peer_addr(),
                        message_id = %message.message_id,
                        attempt,
                        "retransmitting"
                    );
                    self.transmit(message).await;
                }
                TimerEvent::TimedOut(completed) => {
                    warn!(
                        peer = %self.peer_addr(),
                        exchange = %completed.handle,
                        kind = ?completed.kind,
                        "exchange timed out"
                    );
                    self.publish_result(&completed);
                    if completed.kind.triggers_reconnect() && self.session.is_open() {
                        self.on_failure(FailureCause::AckTimeout);
                    }
                }
            }
        }
    }

    /// Close the prior socket and open a fresh one.
    async fn attempt(&mut self) {
        self.reconnect_at = None;
        self.awaiting_proof = false;
        self.proof_deadline = None;
        self.exchanges.suspend_all();
        debug!(
            peer = %self.peer_addr(),
            failed_attempts = self.failed_attempts,
            "connection attempt"
        );

        match self.session.begin_attempt().await {
            Ok(()) if self.session.is_open() => self.on_link_up().await,
            Ok(()) => self.publish_state(),
            Err(err) if err.is_unreachable() => self.on_unreachable(),
            Err(err) => {
                warn!(peer = %self.peer_addr(), error = %err, "failed to open transport");
                self.on_failure(FailureCause::Transport);
            }
        }
    }

    /// The session just became open: resume suspended traffic.
    async fn on_link_up(&mut self) {
        self.publish_state();

        let messages = self.exchanges.resume_all(
            Instant::now(),
            self.params.confirmable_notifications,
            &self.backoff,
            self.rng.as_mut(),
        );

        let proven = self.session.security_mode() == SecurityMode::Dtls || messages.is_empty();
        if proven {
            self.on_recovered();
        }
        let confirmable = messages.iter().any(OutboundMessage::is_confirmable);

        for message in messages {
            self.transmit(message).await;
        }
        if proven || !self.session.is_open() {
            return;
        }

        // A plaintext open proves nothing until the peer answers. Without a
        // confirmable message to answer, a quiet ACK_TIMEOUT with no
        // unreachable signal has to do.
        self.awaiting_proof = true;
        if !confirmable {
            self.proof_deadline = Some(Instant::now() + self.params.ack_timeout);
        }
    }

    fn on_recovered(&mut self) {
        self.awaiting_proof = false;
        self.proof_deadline = None;
        if self.connections > 0 {
            info!(
                peer = %self.peer_addr(),
                icmp_failures = self.icmp.current_count(),
                "peer reachable again"
            );
            self.emit(SupervisorEvent::Reconnected);
        } else {
            info!(peer = %self.peer_addr(), "connected");
        }
        self.connections += 1;
        self.icmp.reset();
        self.failed_attempts = 0;
    }

    fn on_unreachable(&mut self) {
        let peer = self.peer_addr();
        let count = self.icmp.on_icmp_unreachable(peer);
        warn!(peer = %peer, icmp_failures = count, "icmp destination unreachable");
        self.on_failure(FailureCause::Unreachable);
    }

    fn on_failure(&mut self, cause: FailureCause) {
        self.session.close();
        self.exchanges.suspend_all();
        self.awaiting_proof = false;
        self.proof_deadline = None;
        self.failed_attempts += 1;

        if self.failed_attempts >= self.params.max_icmp_failures {
            self.session.mark_failed();
            self.reconnect_at = None;
            self.publish_state();
            let icmp_failures = self.icmp.current_count();
            warn!(
                peer = %self.peer_addr(),
                failed_attempts = self.failed_attempts,
                icmp_failures,
                "reconnect attempts exhausted, waiting for explicit reconnect"
            );
            self.emit(SupervisorEvent::Suspended { icmp_failures });
            return;
        }

        let delay = match cause {
            FailureCause::AckTimeout => std::time::Duration::ZERO,
            FailureCause::Unreachable | FailureCause::Handshake | FailureCause::Transport => self
                .backoff
                .next_interval(self.failed_attempts - 1, self.rng.as_mut()),
        };
        self.reconnect_at = Some(Instant::now() + delay);
        self.publish_state();
        info!(
            peer = %self.peer_addr(),
            ?cause,
            failed_attempts = self.failed_attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    async fn on_inbound(&mut self, message: InboundMessage) {
        if self.awaiting_proof {
            self.on_recovered();
        }

        match message.message_type {
            MessageType::Acknowledgement => match self.exchanges.on_ack(message.message_id) {
                Some(completed) => {
                    debug!(exchange = %completed.handle, message_id = %message.message_id, "acknowledged");
                    self.publish_result(&completed);
                    if let Some(next) = completed.follow_up {
                        self.start_exchange(next).await;
                    }
                }
                None => debug!(message_id = %message.message_id, "ack for unknown exchange"),
            },
            MessageType::Reset => match self.exchanges.on_reset(message.message_id) {
                Some(completed) => {
                    info!(exchange = %completed.handle, message_id = %message.message_id, "exchange reset by peer");
                    self.publish_result(&completed);
                }
                None => debug!(message_id = %message.message_id, "reset for unknown exchange"),
            },
            MessageType::Confirmable | MessageType::NonConfirmable => {}
        }

        if message.code != codes::EMPTY {
            self.emit(SupervisorEvent::Inbound(message));
        }
    }

    async fn start_exchange(&mut self, handle: ExchangeHandle) {
        if !self.session.is_open() {
            return;
        }
        let message =
            self.exchanges
                .start(handle, Instant::now(), &self.backoff, self.rng.as_mut());
        if let Some(message) = message {
            self.transmit(message).await;
        }
    }

    /// Send on the session; non-confirmable messages are held while the
    /// link is down.
    async fn transmit(&mut self, message: OutboundMessage) {
        if !self.session.is_open() {
            if !message.is_confirmable() {
                self.defer(message);
            }
            return;
        }

        if let Err(err) = self.session.send(&message).await {
            let unreachable = err.is_unreachable();
            if !message.is_confirmable() {
                self.defer(message);
            }
            if unreachable {
                self.on_unreachable();
            } else {
                warn!(peer = %self.peer_addr(), error = %err, "send failed");
                self.on_failure(FailureCause::Transport);
            }
        } else if !message.is_confirmable() {
            self.exchanges.mark_sent(message.message_id);
        }
    }

    fn defer(&mut self, message: OutboundMessage) {
        if let Some(dropped) = self.exchanges.defer(message) {
            warn!(
                peer = %self.peer_addr(),
                message_id = %dropped.message_id,
                "deferred queue full, dropping oldest message"
            );
        }
    }

    fn shutdown(&mut self) {
        for completed in self.exchanges.abort_all() {
            self.publish_result(&completed);
        }
        self.reconnect_at = None;
        self.session.close();
        self.publish_state();
        info!(peer = %self.peer_addr(), "supervisor stopped");
    }

    fn publish_result(&self, completed: &Completed) {
        self.emit(SupervisorEvent::ExchangeResult {
            handle: completed.handle,
            outcome: completed.outcome,
        });
    }

    fn publish_state(&mut self) {
        let state = self.session.state();
        if state != self.reported_state {
            debug!(peer = %self.peer_addr(), from = ?self.reported_state, to = ?state, "state changed");
            self.reported_state = state;
            self.emit(SupervisorEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

impl<T> std::fmt::Debug for ReconnectionSupervisor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionSupervisor")
            .field("params", &self.params)
            .field("failed_attempts", &self.failed_attempts)
            .field("reconnect_at", &self.reconnect_at)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

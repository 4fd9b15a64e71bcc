//! Owner-facing API: builder, handle and event stream.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::supervisor::{
    Command, NotifyReceipt, ReconnectionSupervisor, RequestKind, SupervisorEvent,
    SupervisorStatus,
};
use crate::core::{ConfigError, RandomSource, RetransmissionParameters, SeededRng, constants};
use crate::retransmit::{ExchangeHandle, ObservationId};
use crate::transport::TransportIo;

/// Errors returned to the owner layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The supervisor task is gone.
    #[error("supervisor disconnected")]
    Disconnected,

    /// The command queue is full.
    #[error("command queue full")]
    QueueFull,
}

/// Builder for a [`ReconnectionSupervisor`].
///
/// # Example
///
/// ```ignore
/// use lwm2m_recovery::prelude::*;
///
/// let params = RetransmissionParameters::builder()
///     .max_icmp_failures(5)
///     .build()?;
/// let (peer, mut events) = SupervisorBuilder::new()
///     .parameters(params)
///     .spawn(UdpTransport::new(server_addr))?;
///
/// let registration = peer.register(payload).await?;
/// while let Some(event) = events.recv().await {
///     // ...
/// }
/// ```
pub struct SupervisorBuilder {
    params: RetransmissionParameters,
    rng_seed: Option<u64>,
    random_source: Option<Box<dyn RandomSource>>,
    command_queue_depth: usize,
}

impl SupervisorBuilder {
    /// Create a builder with default parameters.
    pub fn new() -> Self {
        Self {
            params: RetransmissionParameters::default(),
            rng_seed: None,
            random_source: None,
            command_queue_depth: constants::COMMAND_QUEUE_DEPTH,
        }
    }

    /// Set the retransmission parameters.
    pub fn parameters(mut self, params: RetransmissionParameters) -> Self {
        self.params = params;
        self
    }

    /// Seed the jitter generator for a reproducible schedule.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Use a custom random source. Takes precedence over [`rng_seed`](Self::rng_seed).
    pub fn random_source(mut self, source: impl RandomSource + 'static) -> Self {
        self.random_source = Some(Box::new(source));
        self
    }

    /// Set the command queue depth.
    pub fn command_queue_depth(mut self, depth: usize) -> Self {
        self.command_queue_depth = depth;
        self
    }

    /// Build the supervisor without spawning it.
    pub fn build<T: TransportIo>(
        self,
        transport: T,
    ) -> Result<(ReconnectionSupervisor<T>, PeerHandle, SupervisorEvents), ClientError> {
        self.params.validate()?;
        if self.command_queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth.into());
        }

        let rng = match self.random_source {
            Some(source) => source,
            None => Box::new(SeededRng::new(self.rng_seed)),
        };
        let peer = transport.peer_addr();
        let (command_tx, command_rx) = mpsc::channel(self.command_queue_depth);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let supervisor =
            ReconnectionSupervisor::new(self.params, rng, transport, command_rx, event_tx);
        let handle = PeerHandle {
            tx: command_tx,
            peer,
        };
        Ok((supervisor, handle, SupervisorEvents { rx: event_rx }))
    }

    /// Build the supervisor and spawn it on the current tokio runtime.
    pub fn spawn<T: TransportIo + 'static>(
        self,
        transport: T,
    ) -> Result<(PeerHandle, SupervisorEvents), ClientError> {
        let (supervisor, handle, events) = self.build(transport)?;
        tokio::spawn(supervisor.run());
        Ok((handle, events))
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SupervisorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorBuilder")
            .field("params", &self.params)
            .field("rng_seed", &self.rng_seed)
            .field("custom_random_source", &self.random_source.is_some())
            .field("command_queue_depth", &self.command_queue_depth)
            .finish()
    }
}

/// Cloneable handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Command>,
    peer: SocketAddr,
}

impl PeerHandle {
    /// Submit a request.
    ///
    /// Confirmable submissions return the handle their
    /// [`SupervisorEvent::ExchangeResult`] will carry. Non-confirmable ones
    /// are sent once without tracking and return `None`; while the transport
    /// is down at most [`MAX_DEFERRED_MESSAGES`](constants::MAX_DEFERRED_MESSAGES)
    /// of them are held, newest kept.
    pub async fn submit(
        &self,
        payload: Vec<u8>,
        confirmable: bool,
    ) -> Result<Option<ExchangeHandle>, ClientError> {
        if confirmable {
            self.exchange(RequestKind::Request, payload).await.map(Some)
        } else {
            self.request(|reply| Command::Send { payload, reply })
                .await
                .map(|()| None)
        }
    }

    /// Submit a confirmable Register or Update.
    ///
    /// If it times out the transport is torn down and reconnected.
    pub async fn register(&self, payload: Vec<u8>) -> Result<ExchangeHandle, ClientError> {
        self.exchange(RequestKind::Registration, payload).await
    }

    async fn exchange(
        &self,
        kind: RequestKind,
        payload: Vec<u8>,
    ) -> Result<ExchangeHandle, ClientError> {
        self.request(|reply| Command::Submit {
            kind,
            payload,
            reply,
        })
        .await
    }

    /// Offer the latest value of an observed resource.
    pub async fn notify(
        &self,
        observation: ObservationId,
        payload: Vec<u8>,
    ) -> Result<NotifyReceipt, ClientError> {
        self.request(|reply| Command::Notify {
            observation,
            payload,
            reply,
        })
        .await
    }

    /// Force a fresh connection attempt and reset the retry budget.
    ///
    /// Aborts any pending backoff or handshake wait.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.tx
            .send(Command::Reconnect)
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Like [`reconnect`](Self::reconnect), without waiting for queue space.
    pub fn request_reconnect(&self) -> Result<(), ClientError> {
        self.tx.try_send(Command::Reconnect).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::Disconnected,
        })
    }

    /// Snapshot of the supervisor.
    pub async fn status(&self) -> Result<SupervisorStatus, ClientError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Abort every pending exchange, close the transport and stop the task.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the supervisor task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClientError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ClientError::Disconnected)?;
        response.await.map_err(|_| ClientError::Disconnected)
    }
}

/// Events published by a supervisor.
#[derive(Debug)]
pub struct SupervisorEvents {
    rx: mpsc::UnboundedReceiver<SupervisorEvent>,
}

impl SupervisorEvents {
    /// Next event; `None` once the supervisor has stopped and the queue is drained.
    pub async fn recv(&mut self) -> Option<SupervisorEvent> {
        self.rx.recv().await
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<SupervisorEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retransmit::ExchangeKind;
    use crate::transport::{
        Incoming, OutboundMessage, SecurityMode, TransportError, TransportResult,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct Unplugged;

    #[async_trait]
    impl TransportIo for Unplugged {
        fn security_mode(&self) -> SecurityMode {
            SecurityMode::None
        }

        fn peer_addr(&self) -> SocketAddr {
            SocketAddr::from(([198, 51, 100, 1], 5683))
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }

        async fn open(&mut self) -> TransportResult<()> {
            Err(TransportError::Unreachable)
        }

        fn close(&mut self) {}

        async fn send(&mut self, _message: &OutboundMessage) -> TransportResult<()> {
            Err(TransportError::NotOpen)
        }

        async fn receive(&mut self) -> TransportResult<Incoming> {
            std::future::pending().await
        }
    }

    fn detached() -> (PeerHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(4);
        let handle = PeerHandle {
            tx,
            peer: Unplugged.peer_addr(),
        };
        (handle, rx)
    }

    #[tokio::test]
    async fn test_register_returns_the_exchange_handle() {
        let (handle, mut rx) = detached();
        let owner = tokio::spawn(async move { handle.register(b"reg".to_vec()).await });

        match rx.recv().await {
            Some(Command::Submit { kind, reply, .. }) => {
                assert_eq!(kind, RequestKind::Registration);
                reply.send(ExchangeHandle(42)).unwrap();
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(owner.await.unwrap().unwrap(), ExchangeHandle(42));
    }

    #[tokio::test]
    async fn test_submissions_never_carry_notify_kind() {
        let (handle, mut rx) = detached();
        let owner = tokio::spawn(async move {
            let confirmable = handle.submit(b"a".to_vec(), true).await.unwrap();
            let plain = handle.submit(b"b".to_vec(), false).await.unwrap();
            (confirmable, plain)
        });

        match rx.recv().await {
            Some(Command::Submit { kind, reply, .. }) => {
                assert!(matches!(ExchangeKind::from(kind), ExchangeKind::Request));
                reply.send(ExchangeHandle(1)).unwrap();
            }
            other => panic!("unexpected command {other:?}"),
        }
        match rx.recv().await {
            Some(Command::Send { payload, reply }) => {
                assert_eq!(payload, b"b".to_vec());
                reply.send(()).unwrap();
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(owner.await.unwrap(), (Some(ExchangeHandle(1)), None));
    }

    #[tokio::test]
    async fn test_register_reports_dropped_reply() {
        let (handle, mut rx) = detached();
        let owner = tokio::spawn(async move { handle.register(b"reg".to_vec()).await });

        // supervisor stops before answering
        drop(rx.recv().await);
        drop(rx);
        assert!(matches!(
            owner.await.unwrap(),
            Err(ClientError::Disconnected)
        ));
    }

    #[test]
    fn test_builder_rejects_zero_queue_depth() {
        let result = SupervisorBuilder::new()
            .command_queue_depth(0)
            .build(Unplugged);
        assert!(matches!(
            result,
            Err(ClientError::Config(ConfigError::ZeroQueueDepth))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_parameters() {
        let params = RetransmissionParameters {
            ack_random_factor: 0.5,
            ..RetransmissionParameters::default()
        };
        let result = SupervisorBuilder::new().parameters(params).build(Unplugged);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_request_reconnect_reports_full_queue() {
        let (_supervisor, handle, _events) = SupervisorBuilder::new()
            .command_queue_depth(1)
            .build(Unplugged)
            .unwrap();

        handle.request_reconnect().unwrap();
        assert!(matches!(
            handle.request_reconnect(),
            Err(ClientError::QueueFull)
        ));
    }

    #[test]
    fn test_dropped_supervisor_disconnects_handle() {
        let (supervisor, handle, _events) = SupervisorBuilder::new().build(Unplugged).unwrap();
        drop(supervisor);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.request_reconnect(),
            Err(ClientError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_at_open_suspends_after_budget() {
        let params = RetransmissionParameters::builder()
            .ack_random_factor(1.0)
            .max_icmp_failures(2)
            .build()
            .unwrap();
        let (handle, mut events) = SupervisorBuilder::new()
            .parameters(params)
            .spawn(Unplugged)
            .unwrap();

        // fails at t=0, retries at t=2 and gives up
        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, crate::transport::ConnectionState::Failed);
        assert_eq!(status.icmp_failures, 2);
        assert_eq!(status.connections, 0);

        let mut suspended = false;
        while let Some(event) = events.try_recv() {
            if event == (SupervisorEvent::Suspended { icmp_failures: 2 }) {
                suspended = true;
            }
        }
        assert!(suspended);

        handle.shutdown().await.unwrap();
        assert!(matches!(
            handle.status().await,
            Err(ClientError::Disconnected)
        ));
    }
}

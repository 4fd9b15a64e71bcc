//! A single confirmable exchange and its retransmission state machine.
//!
//! ```text
//!            ack                    reset
//!   ACKED ◄────────  PENDING  ────────►  ABORTED
//!                      │  ▲
//!           deadline,  │  │ retransmit while
//!   attempt == max     │  │ attempt < max
//!                      ▼  │
//!                   TIMED_OUT
//! ```
//!
//! The exchange is sans-IO: callers pass the current instant and act on the
//! returned [`TimerAction`].

use std::fmt;

use tokio::time::Instant;

use super::backoff::BackoffTimer;
use crate::core::RandomSource;
use crate::transport::{MessageId, MessageType, OutboundMessage, Token, codes};

/// Owner-visible identifier of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeHandle(pub u64);

impl fmt::Display for ExchangeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an observed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationId(pub u64);

/// What an exchange carries, which decides how its failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Ordinary request; its timeout only concerns the owner.
    Request,
    /// Register or Update; a timeout means the server is lost.
    Registration,
    /// Notification for an observation.
    Notify(ObservationId),
}

impl ExchangeKind {
    /// Whether exhausting retransmissions should tear down the transport.
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self, ExchangeKind::Registration | ExchangeKind::Notify(_))
    }

    /// CoAP code used on the wire.
    pub fn code(&self) -> u8 {
        match self {
            ExchangeKind::Request | ExchangeKind::Registration => codes::POST,
            ExchangeKind::Notify(_) => codes::CONTENT,
        }
    }
}

/// Exchange lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Waiting for an ACK (possibly suspended while the transport is down).
    Pending,
    /// Acknowledged by the peer.
    Acked,
    /// Retransmissions exhausted.
    TimedOut,
    /// Reset by the peer or cancelled locally.
    Aborted,
}

/// Terminal result reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The peer acknowledged the message.
    Acked,
    /// No acknowledgement after the last retransmission.
    TimedOut,
    /// The peer reset the message, or the engine shut down.
    Aborted,
}

impl ExchangeState {
    /// The terminal outcome, if the state is terminal.
    pub fn outcome(self) -> Option<ExchangeOutcome> {
        match self {
            ExchangeState::Pending => None,
            ExchangeState::Acked => Some(ExchangeOutcome::Acked),
            ExchangeState::TimedOut => Some(ExchangeOutcome::TimedOut),
            ExchangeState::Aborted => Some(ExchangeOutcome::Aborted),
        }
    }
}

/// What to do after a deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Nothing is due.
    Idle,
    /// Send the payload again; `attempt` is the new attempt count.
    Retransmit {
        /// Attempt count after incrementing.
        attempt: u32,
    },
    /// The exchange just timed out.
    TimedOut,
}

/// One outstanding confirmable message.
#[derive(Debug, Clone)]
pub struct ConfirmableExchange {
    handle: ExchangeHandle,
    message_id: MessageId,
    token: Token,
    kind: ExchangeKind,
    payload: Vec<u8>,
    attempt_count: u32,
    deadline: Option<Instant>,
    state: ExchangeState,
}

impl ConfirmableExchange {
    /// Create a pending exchange that has not been transmitted yet.
    pub fn new(
        handle: ExchangeHandle,
        message_id: MessageId,
        token: Token,
        kind: ExchangeKind,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            handle,
            message_id,
            token,
            kind,
            payload,
            attempt_count: 0,
            deadline: None,
            state: ExchangeState::Pending,
        }
    }

    /// Record the first transmission at `now` and arm the attempt-0 deadline.
    ///
    /// Also used when resuming after a reconnect, which restarts the schedule.
    pub fn start(&mut self, now: Instant, backoff: &BackoffTimer, rng: &mut dyn RandomSource) {
        if self.state != ExchangeState::Pending {
            return;
        }
        self.attempt_count = 0;
        self.deadline = Some(now + backoff.next_interval(0, rng));
    }

    /// Stop the timer while the transport is down. The exchange stays pending.
    pub fn suspend(&mut self) {
        self.deadline = None;
    }

    /// Check the deadline at `now`.
    ///
    /// Retransmits while `attempt_count < max_retransmit`, otherwise moves to
    /// [`ExchangeState::TimedOut`]. The next deadline is measured from the
    /// previous one so a late wakeup does not stretch the schedule.
    pub fn on_deadline(
        &mut self,
        now: Instant,
        max_retransmit: u32,
        backoff: &BackoffTimer,
        rng: &mut dyn RandomSource,
    ) -> TimerAction {
        let Some(deadline) = self.deadline else {
            return TimerAction::Idle;
        };
        if self.state != ExchangeState::Pending || now < deadline {
            return TimerAction::Idle;
        }

        if self.attempt_count < max_retransmit {
            self.attempt_count += 1;
            self.deadline = Some(deadline + backoff.next_interval(self.attempt_count, rng));
            TimerAction::Retransmit {
                attempt: self.attempt_count,
            }
        } else {
            self.state = ExchangeState::TimedOut;
            self.deadline = None;
            TimerAction::TimedOut
        }
    }

    /// Handle an ACK. Returns `true` if the exchange completed.
    pub fn on_ack(&mut self) -> bool {
        self.finish(ExchangeState::Acked)
    }

    /// Handle a Reset. Returns `true` if the exchange was aborted.
    pub fn on_reset(&mut self) -> bool {
        self.finish(ExchangeState::Aborted)
    }

    /// Cancel locally. Returns `true` if the exchange was still pending.
    pub fn abort(&mut self) -> bool {
        self.finish(ExchangeState::Aborted)
    }

    fn finish(&mut self, state: ExchangeState) -> bool {
        if self.state != ExchangeState::Pending {
            return false;
        }
        self.state = state;
        self.deadline = None;
        true
    }

    /// Replace the payload (a newer notification value).
    pub fn replace_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Wire form of the current transmission.
    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage {
            message_type: MessageType::Confirmable,
            code: self.kind.code(),
            message_id: self.message_id,
            token: self.token,
            payload: self.payload.clone(),
        }
    }

    /// Owner handle.
    pub fn handle(&self) -> ExchangeHandle {
        self.handle
    }

    /// Message id ACKs are matched on.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Exchange kind.
    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Current payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Retransmissions performed so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Next deadline, `None` when suspended or terminal.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Lifecycle state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Pending with no armed timer.
    pub fn is_suspended(&self) -> bool {
        self.state == ExchangeState::Pending && self.deadline.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SeededRng;
    use std::time::Duration;

    fn exchange() -> ConfirmableExchange {
        ConfirmableExchange::new(
            ExchangeHandle(1),
            MessageId(10),
            Token(99),
            ExchangeKind::Notify(ObservationId(3)),
            b"21.5".to_vec(),
        )
    }

    fn fixed_backoff() -> BackoffTimer {
        BackoffTimer::new(Duration::from_secs(2), 1.0)
    }

    #[test]
    fn test_new_exchange_is_suspended() {
        let ex = exchange();
        assert_eq!(ex.state(), ExchangeState::Pending);
        assert!(ex.is_suspended());
        assert_eq!(ex.attempt_count(), 0);
    }

    #[test]
    fn test_retransmit_schedule_until_timeout() {
        let backoff = fixed_backoff();
        let mut rng = SeededRng::new(Some(1));
        let mut ex = exchange();
        let t0 = Instant::now();

        ex.start(t0, &backoff, &mut rng);
        assert_eq!(ex.deadline(), Some(t0 + Duration::from_secs(2)));

        // Not due yet
        assert_eq!(
            ex.on_deadline(t0 + Duration::from_secs(1), 2, &backoff, &mut rng),
            TimerAction::Idle
        );

        let t = t0 + Duration::from_secs(2);
        assert_eq!(
            ex.on_deadline(t, 2, &backoff, &mut rng),
            TimerAction::Retransmit { attempt: 1 }
        );
        assert_eq!(ex.deadline(), Some(t0 + Duration::from_secs(6)));

        let t = t0 + Duration::from_secs(6);
        assert_eq!(
            ex.on_deadline(t, 2, &backoff, &mut rng),
            TimerAction::Retransmit { attempt: 2 }
        );
        assert_eq!(ex.deadline(), Some(t0 + Duration::from_secs(14)));

        let t = t0 + Duration::from_secs(14);
        assert_eq!(ex.on_deadline(t, 2, &backoff, &mut rng), TimerAction::TimedOut);
        assert_eq!(ex.state(), ExchangeState::TimedOut);
        assert_eq!(ex.attempt_count(), 2);
        assert_eq!(ex.deadline(), None);
    }

    #[test]
    fn test_late_wakeup_keeps_schedule() {
        let backoff = fixed_backoff();
        let mut rng = SeededRng::new(Some(1));
        let mut ex = exchange();
        let t0 = Instant::now();

        ex.start(t0, &backoff, &mut rng);
        ex.on_deadline(t0 + Duration::from_millis(2300), 4, &backoff, &mut rng);
        assert_eq!(ex.deadline(), Some(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_zero_max_retransmit_times_out_at_first_deadline() {
        let backoff = fixed_backoff();
        let mut rng = SeededRng::new(Some(1));
        let mut ex = exchange();
        let t0 = Instant::now();

        ex.start(t0, &backoff, &mut rng);
        assert_eq!(
            ex.on_deadline(t0 + Duration::from_secs(2), 0, &backoff, &mut rng),
            TimerAction::TimedOut
        );
    }

    #[test]
    fn test_ack_cancels_timer() {
        let backoff = fixed_backoff();
        let mut rng = SeededRng::new(Some(1));
        let mut ex = exchange();
        let t0 = Instant::now();

        ex.start(t0, &backoff, &mut rng);
        assert!(ex.on_ack());
        assert_eq!(ex.state(), ExchangeState::Acked);
        assert_eq!(ex.deadline(), None);
        assert_eq!(
            ex.on_deadline(t0 + Duration::from_secs(60), 4, &backoff, &mut rng),
            TimerAction::Idle
        );

        // Duplicate ACK and late Reset are ignored
        assert!(!ex.on_ack());
        assert!(!ex.on_reset());
        assert_eq!(ex.state().outcome(), Some(ExchangeOutcome::Acked));
    }

    #[test]
    fn test_reset_aborts() {
        let mut ex = exchange();
        assert!(ex.on_reset());
        assert_eq!(ex.state(), ExchangeState::Aborted);
        assert_eq!(ex.state().outcome(), Some(ExchangeOutcome::Aborted));
    }

    #[test]
    fn test_suspend_and_restart() {
        let backoff = fixed_backoff();
        let mut rng = SeededRng::new(Some(1));
        let mut ex = exchange();
        let t0 = Instant::now();

        ex.start(t0, &backoff, &mut rng);
        ex.on_deadline(t0 + Duration::from_secs(2), 4, &backoff, &mut rng);
        assert_eq!(ex.attempt_count(), 1);

        ex.suspend();
        assert!(ex.is_suspended());
        assert_eq!(
            ex.on_deadline(t0 + Duration::from_secs(100), 4, &backoff, &mut rng),
            TimerAction::Idle
        );

        let t1 = t0 + Duration::from_secs(30);
        ex.start(t1, &backoff, &mut rng);
        assert_eq!(ex.attempt_count(), 0);
        assert_eq!(ex.deadline(), Some(t1 + Duration::from_secs(2)));
    }

    #[test]
    fn test_to_message_uses_kind_code() {
        let mut ex = exchange();
        ex.replace_payload(b"22.0".to_vec());
        let msg = ex.to_message();
        assert!(msg.is_confirmable());
        assert_eq!(msg.code, codes::CONTENT);
        assert_eq!(msg.message_id, MessageId(10));
        assert_eq!(msg.payload, b"22.0");
    }

    #[test]
    fn test_reconnect_triggering_kinds() {
        assert!(ExchangeKind::Registration.triggers_reconnect());
        assert!(ExchangeKind::Notify(ObservationId(1)).triggers_reconnect());
        assert!(!ExchangeKind::Request.triggers_reconnect());
    }
}

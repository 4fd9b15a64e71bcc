//! All confirmable exchanges of one peer, plus per-observation slots.
//!
//! The table enforces the one-in-flight-per-observation rule: a new value
//! for an observation whose Notify is still unacknowledged is coalesced and
//! sent after the ACK, and only the latest value survives an outage.

use std::collections::{HashMap, VecDeque};

use tokio::time::Instant;
use tracing::debug;

use super::backoff::BackoffTimer;
use super::exchange::{
    ConfirmableExchange, ExchangeHandle, ExchangeKind, ExchangeOutcome, ObservationId,
    TimerAction,
};
use crate::core::RandomSource;
use crate::core::constants::MAX_DEFERRED_MESSAGES;
use crate::transport::{MessageId, MessageType, OutboundMessage, Token};

/// Per-observation bookkeeping.
#[derive(Debug, Default, Clone)]
struct ObservationSlot {
    /// The single Notify exchange allowed in flight.
    in_flight: Option<ExchangeHandle>,
    /// Newest value produced while `in_flight` was awaiting its ACK.
    coalesced: Option<Vec<u8>>,
    /// Latest value that still has to reach the peer once the link is back.
    unsent: Option<Vec<u8>>,
}

/// Result of offering a new notification value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyDecision {
    /// A new confirmable exchange was created; start it if the link is open.
    Start(ExchangeHandle),
    /// The value was folded into the exchange already in flight.
    Coalesced(ExchangeHandle),
    /// Send this non-confirmable message now.
    SendNon(OutboundMessage),
    /// Held until the link is open again.
    Deferred,
}

/// An exchange that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    /// Owner handle.
    pub handle: ExchangeHandle,
    /// Exchange kind.
    pub kind: ExchangeKind,
    /// Terminal outcome.
    pub outcome: ExchangeOutcome,
    /// A coalesced Notify created in place of the completed one.
    pub follow_up: Option<ExchangeHandle>,
}

/// Timer-driven work produced by [`ExchangeTable::poll_timers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Send this message again.
    Retransmit {
        /// The unchanged message.
        message: OutboundMessage,
        /// Retransmission count after this send.
        attempt: u32,
    },
    /// An exchange exhausted its retransmissions.
    TimedOut(Completed),
}

/// Exchange registry for a single peer.
#[derive(Debug)]
pub struct ExchangeTable {
    exchanges: HashMap<ExchangeHandle, ConfirmableExchange>,
    by_message_id: HashMap<MessageId, ExchangeHandle>,
    observations: HashMap<ObservationId, ObservationSlot>,
    deferred: VecDeque<OutboundMessage>,
    /// Non-confirmable notifications handed out but not yet on the wire.
    unsent_notifications: HashMap<MessageId, ObservationId>,
    next_handle: u64,
    next_token: u64,
    next_message_id: u16,
}

impl ExchangeTable {
    /// Create an empty table; message ids start at `initial_message_id`.
    pub fn new(initial_message_id: u16) -> Self {
        Self {
            exchanges: HashMap::new(),
            by_message_id: HashMap::new(),
            observations: HashMap::new(),
            deferred: VecDeque::new(),
            unsent_notifications: HashMap::new(),
            next_handle: 1,
            next_token: 1,
            next_message_id: initial_message_id,
        }
    }

    fn allocate_ids(&mut self) -> (MessageId, Token) {
        let message_id = MessageId(self.next_message_id);
        self.next_message_id = self.next_message_id.wrapping_add(1);
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        (message_id, token)
    }

    /// Create a suspended confirmable exchange.
    pub fn create(&mut self, kind: ExchangeKind, payload: Vec<u8>) -> ExchangeHandle {
        let handle = ExchangeHandle(self.next_handle);
        self.next_handle += 1;
        let (message_id, token) = self.allocate_ids();

        let exchange = ConfirmableExchange::new(handle, message_id, token, kind, payload);
        self.by_message_id.insert(message_id, handle);
        self.exchanges.insert(handle, exchange);
        handle
    }

    /// Build a non-confirmable message with fresh ids.
    pub fn non_confirmable(&mut self, kind: ExchangeKind, payload: Vec<u8>) -> OutboundMessage {
        let (message_id, token) = self.allocate_ids();
        OutboundMessage {
            message_type: MessageType::NonConfirmable,
            code: kind.code(),
            message_id,
            token,
            payload,
        }
    }

    fn notification(&mut self, observation: ObservationId, payload: Vec<u8>) -> OutboundMessage {
        let message = self.non_confirmable(ExchangeKind::Notify(observation), payload);
        self.unsent_notifications.insert(message.message_id, observation);
        message
    }

    /// A non-confirmable message reached the transport.
    pub fn mark_sent(&mut self, message_id: MessageId) {
        self.unsent_notifications.remove(&message_id);
    }

    /// Hold a non-confirmable message until [`resume_all`](Self::resume_all).
    ///
    /// A notification goes back to its observation slot unless a newer value
    /// is already waiting there. Other messages queue up to
    /// [`MAX_DEFERRED_MESSAGES`]; the oldest one is evicted and returned when
    /// the queue is full.
    pub fn defer(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        if let Some(observation) = self.unsent_notifications.remove(&message.message_id) {
            let slot = self.observations.entry(observation).or_default();
            if slot.unsent.is_none() {
                slot.unsent = Some(message.payload);
            }
            return None;
        }

        let evicted = if self.deferred.len() >= MAX_DEFERRED_MESSAGES {
            self.deferred.pop_front()
        } else {
            None
        };
        self.deferred.push_back(message);
        evicted
    }

    /// First transmission of `handle`: arm its timer and return the message.
    pub fn start(
        &mut self,
        handle: ExchangeHandle,
        now: Instant,
        backoff: &BackoffTimer,
        rng: &mut dyn RandomSource,
    ) -> Option<OutboundMessage> {
        let exchange = self.exchanges.get_mut(&handle)?;
        exchange.start(now, backoff, rng);
        Some(exchange.to_message())
    }

    /// Offer a new value for `observation`.
    ///
    /// `confirmable` selects CON or NON delivery; `link_open` says whether a
    /// NON can go out right away.
    pub fn notify(
        &mut self,
        observation: ObservationId,
        payload: Vec<u8>,
        confirmable: bool,
        link_open: bool,
    ) -> NotifyDecision {
        let in_flight = self
            .observations
            .get(&observation)
            .and_then(|slot| slot.in_flight);

        if let Some(handle) = in_flight {
            if let Some(exchange) = self.exchanges.get_mut(&handle) {
                if exchange.is_suspended() {
                    // Never reached the wire in its current form.
                    exchange.replace_payload(payload);
                } else if let Some(slot) = self.observations.get_mut(&observation) {
                    slot.coalesced = Some(payload);
                }
                return NotifyDecision::Coalesced(handle);
            }
        }

        if confirmable {
            let handle = self.create(ExchangeKind::Notify(observation), payload);
            let slot = self.observations.entry(observation).or_default();
            slot.in_flight = Some(handle);
            slot.unsent = None;
            NotifyDecision::Start(handle)
        } else if link_open {
            NotifyDecision::SendNon(self.notification(observation, payload))
        } else {
            self.observations.entry(observation).or_default().unsent = Some(payload);
            NotifyDecision::Deferred
        }
    }

    /// Handle an ACK for `message_id`.
    pub fn on_ack(&mut self, message_id: MessageId) -> Option<Completed> {
        let handle = *self.by_message_id.get(&message_id)?;
        let exchange = self.exchanges.get_mut(&handle)?;
        if !exchange.on_ack() {
            return None;
        }
        let kind = exchange.kind();
        self.remove(handle);

        let follow_up = match kind {
            ExchangeKind::Notify(observation) => self.release_slot(observation),
            _ => None,
        };
        Some(Completed {
            handle,
            kind,
            outcome: ExchangeOutcome::Acked,
            follow_up,
        })
    }

    /// Handle a Reset for `message_id`.
    ///
    /// A Reset to a Notify cancels the observation.
    pub fn on_reset(&mut self, message_id: MessageId) -> Option<Completed> {
        let handle = *self.by_message_id.get(&message_id)?;
        let exchange = self.exchanges.get_mut(&handle)?;
        if !exchange.on_reset() {
            return None;
        }
        let kind = exchange.kind();
        self.remove(handle);

        if let ExchangeKind::Notify(observation) = kind {
            debug!(observation = observation.0, "observation cancelled by reset");
            self.observations.remove(&observation);
        }
        Some(Completed {
            handle,
            kind,
            outcome: ExchangeOutcome::Aborted,
            follow_up: None,
        })
    }

    /// After an ACK: turn a coalesced value into the next exchange.
    fn release_slot(&mut self, observation: ObservationId) -> Option<ExchangeHandle> {
        let coalesced = self
            .observations
            .get_mut(&observation)
            .and_then(|slot| slot.coalesced.take());

        match coalesced {
            Some(payload) => {
                let handle = self.create(ExchangeKind::Notify(observation), payload);
                if let Some(slot) = self.observations.get_mut(&observation) {
                    slot.in_flight = Some(handle);
                }
                Some(handle)
            }
            None => {
                self.observations.remove(&observation);
                None
            }
        }
    }

    /// Fire every due deadline.
    pub fn poll_timers(
        &mut self,
        now: Instant,
        max_retransmit: u32,
        backoff: &BackoffTimer,
        rng: &mut dyn RandomSource,
    ) -> Vec<TimerEvent> {
        let mut due: Vec<ExchangeHandle> = self
            .exchanges
            .values()
            .filter(|ex| ex.deadline().is_some_and(|d| d <= now))
            .map(ConfirmableExchange::handle)
            .collect();
        due.sort();

        let mut events = Vec::with_capacity(due.len());
        for handle in due {
            let Some(exchange) = self.exchanges.get_mut(&handle) else {
                continue;
            };
            match exchange.on_deadline(now, max_retransmit, backoff, rng) {
                TimerAction::Idle => {}
                TimerAction::Retransmit { attempt } => events.push(TimerEvent::Retransmit {
                    message: exchange.to_message(),
                    attempt,
                }),
                TimerAction::TimedOut => {
                    let kind = exchange.kind();
                    let payload = exchange.payload().to_vec();
                    self.remove(handle);
                    if let ExchangeKind::Notify(observation) = kind {
                        let slot = self.observations.entry(observation).or_default();
                        slot.in_flight = None;
                        slot.unsent = Some(slot.coalesced.take().unwrap_or(payload));
                    }
                    events.push(TimerEvent::TimedOut(Completed {
                        handle,
                        kind,
                        outcome: ExchangeOutcome::TimedOut,
                        follow_up: None,
                    }));
                }
            }
        }
        events
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.exchanges.values().filter_map(|ex| ex.deadline()).min()
    }

    /// Stop every timer; called when the transport goes down.
    pub fn suspend_all(&mut self) {
        for exchange in self.exchanges.values_mut() {
            exchange.suspend();
        }
    }

    /// Messages to send once the transport is open again.
    ///
    /// Pending exchanges restart their schedule. A suspended Notify carries
    /// the newest coalesced value; an observation whose Notify timed out gets
    /// exactly one new message with its latest value. Deferred
    /// non-confirmable messages are flushed last.
    pub fn resume_all(
        &mut self,
        now: Instant,
        confirmable_notifications: bool,
        backoff: &BackoffTimer,
        rng: &mut dyn RandomSource,
    ) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();

        let unsent: Vec<(ObservationId, Vec<u8>)> = self
            .observations
            .iter_mut()
            .filter(|(_, slot)| slot.in_flight.is_none())
            .filter_map(|(id, slot)| slot.unsent.take().map(|payload| (*id, payload)))
            .collect();
        for (observation, payload) in unsent {
            if confirmable_notifications {
                let handle = self.create(ExchangeKind::Notify(observation), payload);
                self.observations.entry(observation).or_default().in_flight = Some(handle);
            } else {
                self.observations.remove(&observation);
                messages.push(self.notification(observation, payload));
            }
        }

        let mut pending: Vec<ExchangeHandle> = self.exchanges.keys().copied().collect();
        pending.sort();
        let mut confirmable = Vec::with_capacity(pending.len());
        for handle in pending {
            let Some(exchange) = self.exchanges.get_mut(&handle) else {
                continue;
            };
            if let ExchangeKind::Notify(observation) = exchange.kind() {
                let newer = self
                    .observations
                    .get_mut(&observation)
                    .and_then(|slot| slot.coalesced.take());
                if let Some(payload) = newer {
                    exchange.replace_payload(payload);
                }
            }
            exchange.start(now, backoff, rng);
            confirmable.push(exchange.to_message());
        }

        confirmable.append(&mut messages);
        confirmable.extend(self.deferred.drain(..));
        confirmable
    }

    /// Abort everything; returns the aborted exchanges.
    pub fn abort_all(&mut self) -> Vec<Completed> {
        let mut handles: Vec<ExchangeHandle> = self.exchanges.keys().copied().collect();
        handles.sort();

        let mut aborted = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(mut exchange) = self.remove(handle) {
                if exchange.abort() {
                    aborted.push(Completed {
                        handle,
                        kind: exchange.kind(),
                        outcome: ExchangeOutcome::Aborted,
                        follow_up: None,
                    });
                }
            }
        }
        self.observations.clear();
        self.deferred.clear();
        self.unsent_notifications.clear();
        aborted
    }

    fn remove(&mut self, handle: ExchangeHandle) -> Option<ConfirmableExchange> {
        let exchange = self.exchanges.remove(&handle)?;
        self.by_message_id.remove(&exchange.message_id());
        Some(exchange)
    }

    /// Whether anything is waiting to reach the peer.
    pub fn has_pending_traffic(&self) -> bool {
        !self.exchanges.is_empty()
            || !self.deferred.is_empty()
            || self.observations.values().any(|slot| slot.unsent.is_some())
    }

    /// Look up a live exchange.
    pub fn get(&self, handle: ExchangeHandle) -> Option<&ConfirmableExchange> {
        self.exchanges.get(&handle)
    }

    /// Number of live exchanges.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// No live exchanges.
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

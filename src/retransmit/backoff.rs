//! Randomized exponential backoff for confirmable messages.
//!
//! Implements the CoAP retransmission schedule from RFC 7252 §4.2: attempt
//! `k` waits a duration drawn uniformly from
//! `[ACK_TIMEOUT * 2^k, ACK_TIMEOUT * 2^k * ACK_RANDOM_FACTOR]`.
//! The same schedule paces reconnect attempts after a failure.

use std::time::Duration;

use crate::core::{RandomSource, RetransmissionParameters, constants};

/// Backoff schedule derived from the ACK timeout and random factor.
///
/// The timer holds no per-exchange state: every method is a function of the
/// configuration and the attempt index, plus the injected random draw for
/// [`next_interval`](Self::next_interval).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffTimer {
    ack_timeout: Duration,
    ack_random_factor: f64,
}

impl BackoffTimer {
    /// Create a schedule from an ACK timeout and random factor.
    pub fn new(ack_timeout: Duration, ack_random_factor: f64) -> Self {
        Self {
            ack_timeout,
            ack_random_factor,
        }
    }

    /// Create a schedule from session parameters.
    pub fn from_parameters(params: &RetransmissionParameters) -> Self {
        Self::new(params.ack_timeout, params.ack_random_factor)
    }

    /// `ACK_TIMEOUT * 2^attempt`, saturating at [`Duration::MAX`].
    pub fn base_interval(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(constants::MAX_BACKOFF_EXPONENT);
        self.ack_timeout
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
    }

    /// Closed range the interval for `attempt` is drawn from.
    pub fn interval_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let lower = self.base_interval(attempt);
        (lower, scale(lower, self.ack_random_factor))
    }

    /// Draw the wait before the deadline of `attempt` (0-indexed).
    pub fn next_interval(&self, attempt: u32, rng: &mut dyn RandomSource) -> Duration {
        let (lower, upper) = self.interval_bounds(attempt);
        let spread = upper.saturating_sub(lower);
        if spread.is_zero() {
            return lower;
        }
        lower.saturating_add(scale(spread, rng.next_unit()))
    }

    /// Cumulative wait to exhaust attempts `0..=max_retransmit`.
    ///
    /// The lower bound is `ACK_TIMEOUT * (2^(max_retransmit + 1) - 1)`, the
    /// upper bound the same scaled by the random factor.
    pub fn exhaustion_bounds(&self, max_retransmit: u32) -> (Duration, Duration) {
        let lower = (0..=max_retransmit)
            .map(|k| self.base_interval(k))
            .fold(Duration::ZERO, Duration::saturating_add);
        (lower, scale(lower, self.ack_random_factor))
    }

    /// Longest time between the first and last transmission (RFC 7252 `MAX_TRANSMIT_SPAN`).
    pub fn max_transmit_span(&self, max_retransmit: u32) -> Duration {
        if max_retransmit == 0 {
            return Duration::ZERO;
        }
        let (_, upper) = self.exhaustion_bounds(max_retransmit - 1);
        upper
    }

    /// Longest time from the first transmission until the sender gives up
    /// (RFC 7252 `MAX_TRANSMIT_WAIT`).
    pub fn max_transmit_wait(&self, max_retransmit: u32) -> Duration {
        self.exhaustion_bounds(max_retransmit).1
    }

    /// The base ACK timeout.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// The random factor.
    pub fn ack_random_factor(&self) -> f64 {
        self.ack_random_factor
    }
}

fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

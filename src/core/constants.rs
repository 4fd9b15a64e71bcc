//! Protocol defaults for the retransmission engine.
//!
//! The CoAP values come from RFC 7252 §4.8; every one of them can be
//! overridden through [`RetransmissionParameters`](super::RetransmissionParameters).

use std::time::Duration;

// =============================================================================
// COAP TRANSMISSION PARAMETERS (RFC 7252 §4.8)
// =============================================================================

/// Base timeout before the first retransmission.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper multiplier of the randomized retransmission interval.
pub const ACK_RANDOM_FACTOR: f64 = 1.5;

/// Retransmissions of a confirmable message before giving up.
pub const MAX_RETRANSMIT: u32 = 4;

/// Highest attempt index the backoff exponent is allowed to reach.
///
/// Larger indices reuse this exponent instead of overflowing.
pub const MAX_BACKOFF_EXPONENT: u32 = 20;

// =============================================================================
// RECONNECTION
// =============================================================================

/// Failed reconnect attempts tolerated before automatic retries stop.
pub const MAX_ICMP_FAILURES: u32 = 7;

/// Initial wait for a DTLS handshake flight.
pub const DTLS_RETRY_WAIT_MIN: Duration = Duration::from_secs(1);

/// Maximum wait for a DTLS handshake flight.
pub const DTLS_RETRY_WAIT_MAX: Duration = Duration::from_secs(60);

/// Whether notifications are sent as confirmable messages by default.
pub const CONFIRMABLE_NOTIFICATIONS: bool = false;

// =============================================================================
// SUPERVISOR CHANNELS
// =============================================================================

/// Depth of the owner-to-supervisor command queue.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// Non-confirmable requests held while the transport is down.
///
/// The oldest one is dropped when the queue is full.
pub const MAX_DEFERRED_MESSAGES: usize = 32;

// =============================================================================
// COAP FRAMING (RFC 7252 §3)
// =============================================================================

/// CoAP protocol version carried in every header.
pub const COAP_VERSION: u8 = 1;

/// Fixed CoAP header size (version/type/TKL, code, message id).
pub const COAP_HEADER_SIZE: usize = 4;

/// Longest token allowed by RFC 7252.
pub const COAP_MAX_TOKEN_LEN: usize = 8;

//! Error types shared by every layer.

use thiserror::Error;

/// Rejected retransmission parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// ACK timeout must be strictly positive.
    #[error("ack timeout must be greater than zero")]
    ZeroAckTimeout,

    /// ACK random factor below 1.0 (or not a number).
    #[error("ack random factor must be >= 1.0, got {0}")]
    AckRandomFactor(f64),

    /// DTLS handshake waits must be strictly positive.
    #[error("dtls retry wait must be greater than zero")]
    ZeroDtlsWait,

    /// DTLS handshake wait window is inverted.
    #[error("dtls retry wait min ({min_ms} ms) exceeds max ({max_ms} ms)")]
    DtlsWaitWindow {
        /// Configured minimum, in milliseconds.
        min_ms: u128,
        /// Configured maximum, in milliseconds.
        max_ms: u128,
    },

    /// A queue depth of zero would deadlock the supervisor.
    #[error("queue depth must be greater than zero")]
    ZeroQueueDepth,
}

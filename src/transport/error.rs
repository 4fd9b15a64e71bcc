//! Transport layer error types.

use std::io;

use thiserror::Error;

use super::codec::CodecError;

/// Why a single DTLS handshake flight failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// An ICMP unreachable came back for the flight.
    #[error("peer unreachable during handshake")]
    Unreachable,

    /// The peer answered but refused the session.
    #[error("handshake rejected: {0}")]
    Rejected(String),
}

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Destination unreachable, surfaced through the socket.
    #[error("destination unreachable")]
    Unreachable,

    /// Operation requires an open session.
    #[error("transport not open")]
    NotOpen,

    /// The handshake wait window ran out.
    #[error("dtls handshake gave up after {flights} flights")]
    HandshakeExhausted {
        /// Flights sent before giving up.
        flights: u32,
    },

    /// A handshake flight failed.
    #[error("dtls handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Datagram could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// Classify a socket error, folding ICMP-originated kinds into [`Unreachable`](Self::Unreachable).
    pub fn from_io(err: io::Error) -> Self {
        if is_unreachable_kind(err.kind()) {
            TransportError::Unreachable
        } else {
            TransportError::Io(err)
        }
    }

    /// Whether this error is an unreachable signal for the ICMP monitor.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable | TransportError::Handshake(HandshakeError::Unreachable)
        )
    }

    /// Whether a fresh reconnect attempt can recover from this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::Unreachable
                | TransportError::NotOpen
                | TransportError::HandshakeExhausted { .. }
                | TransportError::Handshake(_)
        )
    }
}

/// Socket error kinds the kernel reports after an ICMP destination-unreachable.
pub fn is_unreachable_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_unreachable_kinds() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(TransportError::from_io(refused).is_unreachable());

        let other = io::Error::from(io::ErrorKind::PermissionDenied);
        let err = TransportError::from_io(other);
        assert!(!err.is_unreachable());
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_handshake_unreachable_is_unreachable() {
        assert!(TransportError::Handshake(HandshakeError::Unreachable).is_unreachable());
        assert!(!TransportError::Handshake(HandshakeError::Rejected("bad psk".into())).is_unreachable());
    }

    #[test]
    fn test_retriable_errors() {
        assert!(TransportError::Unreachable.is_retriable());
        assert!(TransportError::HandshakeExhausted { flights: 6 }.is_retriable());
        assert!(!TransportError::Codec(CodecError::Truncated).is_retriable());
    }
}

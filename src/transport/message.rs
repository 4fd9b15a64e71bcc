//! Message-level types exchanged with the transport.
//!
//! The engine never looks inside payloads; it only needs the CoAP message
//! type, the message id ACKs and Resets are matched on, and the token.

use std::fmt;

/// CoAP message type (RFC 7252 §4.2, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Confirmable: retransmitted until acknowledged.
    Confirmable,
    /// Non-confirmable: sent once.
    NonConfirmable,
    /// Acknowledgement of a confirmable message.
    Acknowledgement,
    /// Reset: the peer rejects the message.
    Reset,
}

impl MessageType {
    /// Two-bit wire value.
    pub fn to_bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }

    /// Parse the two-bit wire value.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// 16-bit CoAP message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u16);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Request token (up to 8 bytes on the wire; always 8 here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl Token {
    /// Big-endian wire bytes.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Build a token from up to 8 wire bytes (left-padded with zeros).
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Some(Token(u64::from_be_bytes(buf)))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// CoAP method and response codes the engine emits.
pub mod codes {
    /// Empty message (ACK / Reset without payload).
    pub const EMPTY: u8 = 0x00;
    /// 0.02 POST, used for registration and plain requests.
    pub const POST: u8 = 0x02;
    /// 2.05 Content, used for notifications.
    pub const CONTENT: u8 = 0x45;
}

/// A message handed to the transport for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Confirmable or non-confirmable.
    pub message_type: MessageType,
    /// Method or response code.
    pub code: u8,
    /// Message id, fixed across retransmissions.
    pub message_id: MessageId,
    /// Token.
    pub token: Token,
    /// Opaque options and payload, already encoded by the owner layer.
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Whether the message expects an acknowledgement.
    pub fn is_confirmable(&self) -> bool {
        self.message_type == MessageType::Confirmable
    }
}

/// A message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message type.
    pub message_type: MessageType,
    /// Method or response code.
    pub code: u8,
    /// Message id.
    pub message_id: MessageId,
    /// Token (zero for empty messages).
    pub token: Token,
    /// Remaining bytes after the token.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// An empty ACK for `message_id`.
    pub fn ack(message_id: MessageId) -> Self {
        Self {
            message_type: MessageType::Acknowledgement,
            code: codes::EMPTY,
            message_id,
            token: Token(0),
            payload: Vec::new(),
        }
    }

    /// An empty Reset for `message_id`.
    pub fn reset(message_id: MessageId) -> Self {
        Self {
            message_type: MessageType::Reset,
            code: codes::EMPTY,
            message_id,
            token: Token(0),
            payload: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_bits() {
        for ty in [
            MessageType::Confirmable,
            MessageType::NonConfirmable,
            MessageType::Acknowledgement,
            MessageType::Reset,
        ] {
            assert_eq!(MessageType::from_bits(ty.to_bits()), ty);
        }
    }

    #[test]
    fn test_token_from_short_slice() {
        assert_eq!(Token::from_slice(&[0x01, 0x02]), Some(Token(0x0102)));
        assert_eq!(Token::from_slice(&[]), Some(Token(0)));
        assert_eq!(Token::from_slice(&[0; 9]), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(MessageId(0x2a).to_string(), "0x002a");
        assert_eq!(Token(1).to_string(), "0000000000000001");
    }
}

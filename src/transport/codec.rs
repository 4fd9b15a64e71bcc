//! Minimal CoAP header framing (RFC 7252 §3).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options and payload (opaque here) ...
//! ```
//!
//! Options and payload are produced and consumed by the owner layer; this
//! module only frames the fields the retransmission engine matches on.

use thiserror::Error;

use super::message::{InboundMessage, MessageId, MessageType, OutboundMessage, Token};
use crate::core::constants::{COAP_HEADER_SIZE, COAP_MAX_TOKEN_LEN, COAP_VERSION};

/// Framing errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Shorter than the fixed header plus token.
    #[error("datagram truncated")]
    Truncated,

    /// Unknown protocol version.
    #[error("unsupported version {0}")]
    BadVersion(u8),

    /// Token length 9..=15 is reserved.
    #[error("reserved token length {0}")]
    BadTokenLength(u8),
}

/// Serialize an outbound message.
pub fn encode(message: &OutboundMessage) -> Vec<u8> {
    let token = message.token.to_bytes();
    let mut buf = Vec::with_capacity(COAP_HEADER_SIZE + token.len() + message.payload.len());

    buf.push((COAP_VERSION << 6) | (message.message_type.to_bits() << 4) | token.len() as u8);
    buf.push(message.code);
    buf.extend_from_slice(&message.message_id.0.to_be_bytes());
    buf.extend_from_slice(&token);
    buf.extend_from_slice(&message.payload);
    buf
}

/// Parse a received datagram.
pub fn decode(data: &[u8]) -> Result<InboundMessage, CodecError> {
    if data.len() < COAP_HEADER_SIZE {
        return Err(CodecError::Truncated);
    }

    let version = data[0] >> 6;
    if version != COAP_VERSION {
        return Err(CodecError::BadVersion(version));
    }
    let tkl = data[0] & 0x0F;
    if tkl as usize > COAP_MAX_TOKEN_LEN {
        return Err(CodecError::BadTokenLength(tkl));
    }
    let token_end = COAP_HEADER_SIZE + tkl as usize;
    if data.len() < token_end {
        return Err(CodecError::Truncated);
    }

    let token = Token::from_slice(&data[COAP_HEADER_SIZE..token_end])
        .ok_or(CodecError::BadTokenLength(tkl))?;

    Ok(InboundMessage {
        message_type: MessageType::from_bits(data[0] >> 4),
        code: data[1],
        message_id: MessageId(u16::from_be_bytes([data[2], data[3]])),
        token,
        payload: data[token_end..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::codes;

    #[test]
    fn test_encode_header_layout() {
        let msg = OutboundMessage {
            message_type: MessageType::Confirmable,
            code: codes::POST,
            message_id: MessageId(0x1234),
            token: Token(0xAB),
            payload: vec![0xFF, b'x'],
        };
        let bytes = encode(&msg);

        assert_eq!(bytes[0], 0b0100_1000); // ver 1, CON, TKL 8
        assert_eq!(bytes[1], codes::POST);
        assert_eq!(&bytes[2..4], &[0x12, 0x34]);
        assert_eq!(bytes[11], 0xAB);
        assert_eq!(&bytes[12..], &[0xFF, b'x']);
    }

    #[test]
    fn test_decode_empty_ack() {
        // ver 1, ACK, TKL 0, code 0.00, mid 0x0102
        let msg = decode(&[0x60, 0x00, 0x01, 0x02]).unwrap();
        assert_eq!(msg.message_type, MessageType::Acknowledgement);
        assert_eq!(msg.message_id, MessageId(0x0102));
        assert_eq!(msg.token, Token(0));
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_decode_reset() {
        let msg = decode(&[0x70, 0x00, 0xBE, 0xEF]).unwrap();
        assert_eq!(msg, InboundMessage::reset(MessageId(0xBEEF)));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[0x60, 0x00]), Err(CodecError::Truncated));
        assert_eq!(decode(&[0xA0, 0x00, 0x00, 0x01]), Err(CodecError::BadVersion(2)));
        assert_eq!(decode(&[0x49, 0x00, 0x00, 0x01]), Err(CodecError::BadTokenLength(9)));
        assert_eq!(decode(&[0x42, 0x00, 0x00, 0x01, 0xAA]), Err(CodecError::Truncated));
    }

    #[test]
    fn test_decode_piggybacked_response() {
        let data = [0x62, 0x41, 0x00, 0x07, 0x0A, 0x0B, 0xC1, 0x28];
        let msg = decode(&data).unwrap();
        assert_eq!(msg.message_type, MessageType::Acknowledgement);
        assert_eq!(msg.code, 0x41);
        assert_eq!(msg.token, Token(0x0A0B));
        assert_eq!(msg.payload, vec![0xC1, 0x28]);
    }
}

//! Transport layer: datagram I/O and the transport session.
//!
//! - **Messages**: [`OutboundMessage`] / [`InboundMessage`] and CoAP header framing
//! - **I/O capability**: [`TransportIo`], implemented for plaintext UDP by
//!   [`UdpTransport`] and extended by DTLS stacks through `handshake`
//! - **Session**: [`TransportSession`] with [`ConnectionState`] and DTLS
//!   flight pacing via [`HandshakeBackoff`]
//! - **Faults**: [`FaultInjector`] for partitions and dropped datagrams
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Reconnection Supervisor          │
//! ├─────────────────────────────────────────┤
//! │        Transport Session                │  ← This module
//! │   state, handshake pacing, faults       │
//! ├─────────────────────────────────────────┤
//! │          UDP  /  DTLS                   │
//! └─────────────────────────────────────────┘
//! ```

pub mod codec;
mod error;
mod fault;
mod io;
mod message;
mod session;
#[cfg(feature = "udp")]
#[cfg_attr(docsrs, doc(cfg(feature = "udp")))]
mod socket;

pub use codec::CodecError;
pub use error::*;
pub use fault::{Fault, FaultInjector, FaultPolicy, Partition};
pub use io::{Incoming, SecurityMode, TransportIo};
pub use message::*;
pub use session::{ConnectionState, HandshakeBackoff, SessionEvent, TransportSession};
#[cfg(feature = "udp")]
pub use socket::{DEFAULT_RECV_BUFFER_SIZE, UdpTransport, UdpTransportBuilder};

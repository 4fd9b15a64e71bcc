//! # LWM2M Recovery
//!
//! Retransmission and recovery engine for the transport side of an LWM2M
//! client. It keeps a client attached to its server over lossy links:
//!
//! - **Backoff**: randomized exponential retransmission of confirmable CoAP
//!   messages (RFC 7252 §4.2)
//! - **Exchanges**: per-message state machines, with notifications for an
//!   observation coalesced so only the newest value is in flight
//! - **ICMP tracking**: unreachable signals counted per outage episode
//! - **Reconnection**: bounded reconnect attempts with a separate DTLS
//!   handshake backoff, parked after too many failures until told to retry
//!
//! ## Feature Flags
//!
//! - `udp` (default): plaintext [`transport::UdpTransport`] over tokio
//!
//! ## Modules
//!
//! - [`core`]: parameters, constants, the random source seam and config errors
//! - [`retransmit`]: backoff, exchange and ICMP state machines (no I/O)
//! - [`transport`]: the transport capability, session state and fault injection
//! - [`client`]: the per-peer supervisor task and its handle
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "udp")]
//! # async fn demo() -> Result<(), lwm2m_recovery::client::ClientError> {
//! use lwm2m_recovery::prelude::*;
//!
//! let params = RetransmissionParameters::builder()
//!     .max_icmp_failures(5)
//!     .confirmable_notifications(true)
//!     .build()?;
//!
//! let server = "192.0.2.10:5683".parse().unwrap();
//! let (peer, mut events) = SupervisorBuilder::new()
//!     .parameters(params)
//!     .spawn(UdpTransport::new(server))?;
//!
//! let registration = peer.register(b"</1/0>,</3/0>".to_vec()).await?;
//! peer.notify(ObservationId(1), b"21.5".to_vec()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SupervisorEvent::ExchangeResult { handle, outcome } if handle == registration => {
//!             println!("registration finished: {outcome:?}");
//!         }
//!         SupervisorEvent::Suspended { .. } => peer.reconnect().await?,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod core;
pub mod retransmit;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{
        ClientError, NotifyReceipt, PeerHandle, ReconnectionSupervisor, SupervisorBuilder,
        SupervisorEvent, SupervisorEvents, SupervisorStatus,
    };
    pub use crate::core::*;
    pub use crate::retransmit::{
        BackoffTimer, ExchangeHandle, ExchangeKind, ExchangeOutcome, ObservationId,
    };
    pub use crate::transport::{
        ConnectionState, Fault, FaultInjector, FaultPolicy, Incoming, InboundMessage,
        OutboundMessage, Partition, SecurityMode, TransportError, TransportIo, TransportResult,
    };

    #[cfg(feature = "udp")]
    pub use crate::transport::UdpTransport;
}

pub use crate::client::{PeerHandle, SupervisorBuilder, SupervisorEvent};
pub use crate::core::{RetransmissionParameters, SeededRng};
pub use crate::retransmit::{ExchangeHandle, ExchangeOutcome};
pub use crate::transport::ConnectionState;

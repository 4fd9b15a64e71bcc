//! Retransmission state machines.
//!
//! - **Backoff**: [`BackoffTimer`] computes randomized exponential intervals
//! - **Exchanges**: [`ConfirmableExchange`] tracks one confirmable message;
//!   [`ExchangeTable`] owns every exchange of a peer and coalesces notifications
//! - **ICMP**: [`IcmpFailureMonitor`] counts unreachable signals per episode
//!
//! Nothing here performs I/O. The supervisor feeds in the current instant and
//! incoming ACKs/Resets and executes the transmissions the tables return.

mod backoff;
mod exchange;
mod icmp;
mod table;

pub use backoff::BackoffTimer;
pub use exchange::*;
pub use icmp::IcmpFailureMonitor;
pub use table::{Completed, ExchangeTable, NotifyDecision, TimerEvent};

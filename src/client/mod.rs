//! Client side of the engine: one supervisor task per peer.

mod handle;
mod supervisor;

pub use handle::*;
pub use supervisor::{
    NotifyReceipt, ReconnectionSupervisor, SupervisorEvent, SupervisorStatus,
};

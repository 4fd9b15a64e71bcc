//! Core parameters, constants, error types and the random source seam.
//!
//! Everything in here is free of I/O so the retransmission state machines
//! can be driven deterministically from tests.

pub mod constants;
mod config;
mod error;
mod traits;

pub use config::*;
pub use error::*;
pub use traits::*;

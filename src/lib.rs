//! # ktane-bus
//!
//! Node side of a shared half-duplex serial bus linking puzzle modules to a
//! game controller.
//!
//! Every node on the bus hears every frame. A node that wants to talk first
//! listens for activity, backs off for a randomized delay while the line is
//! busy, asserts its send-intent line, then writes a checksummed frame.
//! Game events are delivered with acknowledgement and retransmission.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Game Logic                             │
//! │          strike() · disarmed() · unable_to_arm() · poll()       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Node Session                            │
//! │        mode · address filter · auto-ACK · duplicate filter      │
//! ├───────────────────────────────┬─────────────────────────────────┤
//! │       Delivery Manager        │        Backoff Arbiter          │
//! │  FIFO · in-flight · retries   │  listen-before-talk · drain     │
//! ├───────────────────────────────┴─────────────────────────────────┤
//! │              Bus Transport (frame read / transmit)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │           Line (RS-485 style half-duplex, or MemoryBus)         │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Wire fields are u8/u16
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]

pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::delivery::{DeliveryConfig, DeliveryManager};
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{MessageType, ModuleFlags, Packet, Sound};
    pub use crate::session::{NodeConfig, NodeSession, SessionEvent};
    pub use crate::transport::{BusTransport, Line, MemoryBus, MemoryLine};
    pub use crate::types::*;
}

//! Relay rendezvous: wire messages, room routing and links
//!
//! The relay only forwards negotiation messages by their `to` field. It never
//! carries signal traffic.

pub mod message;
pub mod rooms;
pub mod link;
pub mod memory;
pub mod tcp;

pub use message::*;
pub use rooms::*;
pub use link::*;
pub use memory::*;
pub use tcp::*;

//! Gratia Transport - Signal carriers
//!
//! This crate provides:
//! - UDP datagram plumbing and the local multi-process broadcast carrier
//! - The relay rendezvous protocol, room routing, and TCP/in-memory links
//! - The lower-level connection capability and an in-memory implementation
//! - The mesh bus: pairwise peer channels negotiated through the relay

pub mod udp;
pub mod broadcast;
pub mod relay;
pub mod connection;
pub mod network;
pub mod session;
pub mod mesh;

pub use udp::*;
pub use broadcast::*;
pub use relay::*;
pub use connection::*;
pub use network::*;
pub use session::*;
pub use mesh::*;

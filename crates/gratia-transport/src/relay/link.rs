//! Peer-side relay link capability

use gratia_core::GratiaResult;
use tokio::sync::mpsc;

use crate::RelayMessage;

/// Messages arriving from the relay
pub type RelayInbound = mpsc::UnboundedReceiver<RelayMessage>;

/// Outbound half of a persistent relay connection
pub trait RelayLink: Send + Sync {
    fn send(&self, msg: RelayMessage) -> GratiaResult<()>;

    /// Close the connection; the inbound stream ends afterwards
    fn close(&self);
}

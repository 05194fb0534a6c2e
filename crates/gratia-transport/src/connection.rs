//! Connection capability
//!
//! The mesh negotiates through these traits only. A host supplies the actual
//! connectivity layer by implementing `Connector`; `MemoryNetwork` is the
//! in-process implementation.

use std::sync::Arc;

use futures::future::BoxFuture;
use gratia_core::{GratiaResult, PeerId};

use crate::{Candidate, SessionDescription};

/// Ordered, reliable logical channel between two peers
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Send one text message; fails once the channel is closed
    fn send_text(&self, text: &str) -> GratiaResult<()>;

    fn close(&self);
}

/// One peer-to-peer connection under negotiation
pub trait PeerConnection: Send + Sync {
    fn create_offer(&self) -> BoxFuture<'_, GratiaResult<SessionDescription>>;

    fn create_answer(&self) -> BoxFuture<'_, GratiaResult<SessionDescription>>;

    fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, GratiaResult<()>>;

    fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, GratiaResult<()>>;

    /// Apply a remote candidate; fails before the remote description is set
    fn add_candidate(&self, candidate: Candidate) -> BoxFuture<'_, GratiaResult<()>>;

    /// Create the logical channel on the initiating side
    fn open_channel(&self, label: &str, ordered: bool) -> GratiaResult<Arc<dyn DataChannel>>;

    fn close(&self);
}

/// Callbacks from a connection back to its owner
///
/// `channel_opened` fires on both sides once the logical channel is usable.
pub trait PeerEventSink: Send + Sync {
    fn local_candidate(&self, candidate: Candidate);

    fn channel_opened(&self, channel: Arc<dyn DataChannel>);

    fn message(&self, text: &str);

    fn channel_closed(&self);

    fn failed(&self, reason: &str);
}

pub type PeerEvents = Arc<dyn PeerEventSink>;

/// Factory for connections
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        local: &PeerId,
        remote: &PeerId,
        events: PeerEvents,
    ) -> GratiaResult<Arc<dyn PeerConnection>>;
}

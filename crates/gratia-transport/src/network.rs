//! In-process connectivity layer
//!
//! Connections live in a shared `MemoryNetwork`. Two endpoints become linked
//! once each has both its local and remote description; at that point the
//! logical channel opened by the initiator gets a counterpart on the other
//! side and both sides see `channel_opened`. Candidates are accepted only
//! after the remote description is set, the same constraint a real
//! connectivity layer imposes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use gratia_core::{GratiaError, GratiaResult, PeerId};
use parking_lot::Mutex;

use crate::{
    Candidate, Connector, DataChannel, PeerConnection, PeerEvents, SdpKind, SessionDescription,
};

type EndpointKey = (PeerId, PeerId);

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<EndpointKey, Arc<MemoryConnection>>,
    connects: Vec<EndpointKey>,
}

/// Shared in-memory network; cloning yields another handle to it
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(local, remote)` pair passed to `connect`, in call order
    pub fn connects(&self) -> Vec<(PeerId, PeerId)> {
        self.state.lock().connects.clone()
    }

    /// Current connection from `local` towards `remote`
    pub fn connection(&self, local: &PeerId, remote: &PeerId) -> Option<Arc<MemoryConnection>> {
        self.state
            .lock()
            .endpoints
            .get(&(local.clone(), remote.clone()))
            .cloned()
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }
}

impl Connector for MemoryNetwork {
    fn connect(
        &self,
        local: &PeerId,
        remote: &PeerId,
        events: PeerEvents,
    ) -> GratiaResult<Arc<dyn PeerConnection>> {
        let connection = Arc::new(MemoryConnection {
            local: local.clone(),
            remote: remote.clone(),
            network: Arc::downgrade(&self.state),
            events,
            state: Mutex::new(ConnectionState::default()),
        });

        let mut net = self.state.lock();
        let key = (local.clone(), remote.clone());
        net.connects.push(key.clone());
        net.endpoints.insert(key, Arc::clone(&connection));
        Ok(connection)
    }
}

#[derive(Default)]
struct ConnectionState {
    local_desc: Option<SessionDescription>,
    remote_desc: Option<SessionDescription>,
    channel: Option<Arc<MemoryChannel>>,
    applied: Vec<Candidate>,
    linked: bool,
    closed: bool,
}

/// One endpoint of an in-memory connection
pub struct MemoryConnection {
    local: PeerId,
    remote: PeerId,
    network: Weak<Mutex<NetworkState>>,
    events: PeerEvents,
    state: Mutex<ConnectionState>,
}

impl MemoryConnection {
    /// Remote candidates applied so far, in order
    pub fn applied_candidates(&self) -> Vec<Candidate> {
        self.state.lock().applied.clone()
    }

    /// This endpoint's logical channel, once opened or linked
    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.state
            .lock()
            .channel
            .clone()
            .map(|c| c as Arc<dyn DataChannel>)
    }

    pub fn is_linked(&self) -> bool {
        self.state.lock().linked
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(&self) -> GratiaResult<()> {
        if self.state.lock().closed {
            return Err(GratiaError::ChannelClosed);
        }
        Ok(())
    }

    fn failure(&self, reason: &str) -> GratiaError {
        GratiaError::NegotiationFailed {
            peer: self.remote.clone(),
            reason: reason.to_string(),
        }
    }

    fn local_candidate(&self) -> Candidate {
        Candidate {
            candidate: format!("candidate:{} 1 memory", self.local),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }

    /// Link with the counterpart endpoint when both sides are ready
    fn try_link(&self) {
        let Some(network) = self.network.upgrade() else {
            return;
        };

        let opened = {
            let net = network.lock();
            let Some(this) = net.endpoints.get(&(self.local.clone(), self.remote.clone())) else {
                return;
            };
            let Some(other) = net.endpoints.get(&(self.remote.clone(), self.local.clone())) else {
                return;
            };
            if !ptr_is(this, self) || !this.ready() || !other.ready() {
                return;
            }

            let mine = self.state.lock().channel.clone();
            let theirs = other.state.lock().channel.clone();
            let (mine, theirs) = match (mine, theirs) {
                (Some(mine), Some(theirs)) => (mine, theirs),
                (Some(mine), None) => {
                    let theirs = MemoryChannel::new(mine.label(), other.events.clone());
                    other.state.lock().channel = Some(Arc::clone(&theirs));
                    (mine, theirs)
                }
                (None, Some(theirs)) => {
                    let mine = MemoryChannel::new(theirs.label(), self.events.clone());
                    self.state.lock().channel = Some(Arc::clone(&mine));
                    (mine, theirs)
                }
                (None, None) => {
                    self.state.lock().linked = true;
                    other.state.lock().linked = true;
                    return;
                }
            };

            MemoryChannel::pair(&mine, &theirs);
            self.state.lock().linked = true;
            other.state.lock().linked = true;
            vec![
                (self.events.clone(), mine as Arc<dyn DataChannel>),
                (other.events.clone(), theirs as Arc<dyn DataChannel>),
            ]
        };

        tracing::trace!(local = %self.local, remote = %self.remote, "memory link up");
        for (events, channel) in opened {
            events.channel_opened(channel);
        }
    }

    fn ready(&self) -> bool {
        let state = self.state.lock();
        !state.closed && !state.linked && state.local_desc.is_some() && state.remote_desc.is_some()
    }
}

fn ptr_is(arc: &Arc<MemoryConnection>, conn: &MemoryConnection) -> bool {
    std::ptr::eq(Arc::as_ptr(arc), conn)
}

impl PeerConnection for MemoryConnection {
    fn create_offer(&self) -> BoxFuture<'_, GratiaResult<SessionDescription>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(SessionDescription::offer(format!(
                "memory {} -> {}",
                self.local, self.remote
            )))
        })
    }

    fn create_answer(&self) -> BoxFuture<'_, GratiaResult<SessionDescription>> {
        Box::pin(async move {
            self.ensure_open()?;
            match &self.state.lock().remote_desc {
                Some(desc) if desc.kind == SdpKind::Offer => Ok(SessionDescription::answer(
                    format!("memory {} -> {}", self.local, self.remote),
                )),
                _ => Err(self.failure("no remote offer to answer")),
            }
        })
    }

    fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, GratiaResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.state.lock().local_desc = Some(desc);
            self.events.local_candidate(self.local_candidate());
            self.try_link();
            Ok(())
        })
    }

    fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, GratiaResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            if desc.sdp.is_empty() {
                return Err(self.failure("empty session description"));
            }
            self.state.lock().remote_desc = Some(desc);
            self.try_link();
            Ok(())
        })
    }

    fn add_candidate(&self, candidate: Candidate) -> BoxFuture<'_, GratiaResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.closed {
                return Err(GratiaError::ChannelClosed);
            }
            if state.remote_desc.is_none() {
                return Err(self.failure("remote description not set"));
            }
            if !candidate.candidate.starts_with("candidate:") {
                return Err(self.failure("malformed candidate"));
            }
            state.applied.push(candidate);
            Ok(())
        })
    }

    fn open_channel(&self, label: &str, ordered: bool) -> GratiaResult<Arc<dyn DataChannel>> {
        self.ensure_open()?;
        if !ordered {
            return Err(GratiaError::InvalidConfig(
                "memory channels are always ordered".into(),
            ));
        }
        let channel = MemoryChannel::new(label, self.events.clone());
        self.state.lock().channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    fn close(&self) {
        let channel = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.channel.take()
        };
        if let Some(channel) = channel {
            channel.close();
        }

        if let Some(network) = self.network.upgrade() {
            let mut net = network.lock();
            let key = (self.local.clone(), self.remote.clone());
            if net.endpoints.get(&key).is_some_and(|c| ptr_is(c, self)) {
                net.endpoints.remove(&key);
            }
        }
    }
}

/// In-memory logical channel; delivery is synchronous
pub struct MemoryChannel {
    label: String,
    open: AtomicBool,
    /// Owner of this end, receives inbound messages
    events: PeerEvents,
    peer: Mutex<Weak<MemoryChannel>>,
}

impl MemoryChannel {
    fn new(label: &str, events: PeerEvents) -> Arc<Self> {
        Arc::new(MemoryChannel {
            label: label.to_string(),
            open: AtomicBool::new(false),
            events,
            peer: Mutex::new(Weak::new()),
        })
    }

    fn pair(a: &Arc<MemoryChannel>, b: &Arc<MemoryChannel>) {
        *a.peer.lock() = Arc::downgrade(b);
        *b.peer.lock() = Arc::downgrade(a);
        a.open.store(true, Ordering::Release);
        b.open.store(true, Ordering::Release);
    }

    fn peer(&self) -> Option<Arc<MemoryChannel>> {
        self.peer.lock().upgrade()
    }

    fn remote_closed(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.events.channel_closed();
        }
    }
}

impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send_text(&self, text: &str) -> GratiaResult<()> {
        if !self.is_open() {
            return Err(GratiaError::ChannelClosed);
        }
        let peer = self.peer().ok_or(GratiaError::ChannelClosed)?;
        if !peer.is_open() {
            return Err(GratiaError::ChannelClosed);
        }
        peer.events.message(text);
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            if let Some(peer) = self.peer() {
                peer.remote_closed();
            }
        }
    }
}

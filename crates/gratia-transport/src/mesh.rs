//! Mesh bus - signal channel over pairwise peer connections
//!
//! The relay is used only for rendezvous: `hello` on start, then `peers`
//! lists drive dialing and `offer`/`answer`/`candidate` messages drive
//! negotiation. Signals travel directly over each peer's logical channel as
//! `{kind: "signal", payload}` frames.
//!
//! Each remote peer gets a worker task that owns its `PeerSession`, so work
//! for one peer is strictly ordered while different peers proceed
//! independently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use gratia_core::{
    GratiaError, GratiaResult, GratiaSignal, ListenerSet, PeerId, SignalFrame, Subscription,
};
use gratia_signal::{SignalChannel, SignalHandler};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    Candidate, Connector, DataChannel, PeerConnection, PeerEventSink, PeerEvents, PeerSession,
    PeerState, RelayInbound, RelayLink, RelayMessage, SessionDescription,
};

/// Mesh configuration
#[derive(Clone, Debug)]
pub struct MeshConfig {
    /// Rendezvous room announced to the relay
    pub room: String,
    pub peer_id: PeerId,
    /// Label of the logical channel opened by initiators
    pub channel_label: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            room: "gratia".to_string(),
            peer_id: PeerId::random(),
            channel_label: "gratia".to_string(),
        }
    }
}

impl MeshConfig {
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<PeerId>) -> Self {
        self.peer_id = peer_id.into();
        self
    }
}

/// Connection counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshStats {
    /// Peers with a live connection object
    pub peers: usize,
    /// Peers with an open logical channel
    pub channels: usize,
}

/// Whether `local` should initiate towards `remote`
///
/// Only the lexicographically smaller id dials, and only when no connection
/// exists. An idle entry (created by early relay traffic) or a closed one may
/// be replaced.
pub fn should_dial(local: &PeerId, remote: &PeerId, existing: Option<PeerState>) -> bool {
    local.dials(remote) && matches!(existing, None | Some(PeerState::Idle | PeerState::Closed))
}

enum PeerCommand {
    Dial,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(Candidate),
    Opened { epoch: u64, channel: Arc<dyn DataChannel> },
    Lost { epoch: u64, reason: String },
}

struct PeerEntry {
    /// Identifies the current connection attempt
    epoch: u64,
    state: PeerState,
    commands: mpsc::UnboundedSender<PeerCommand>,
    connection: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn DataChannel>>,
}

struct MeshState {
    closed: bool,
    next_epoch: u64,
    peers: HashMap<PeerId, PeerEntry>,
}

/// Signal channel over a peer mesh
pub struct MeshBus {
    config: MeshConfig,
    relay: Arc<dyn RelayLink>,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    state: Mutex<MeshState>,
    listeners: ListenerSet<GratiaSignal>,
    relay_task: Mutex<Option<JoinHandle<()>>>,
    me: Weak<MeshBus>,
}

impl MeshBus {
    /// Join the configured room and start reacting to relay traffic
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: MeshConfig,
        relay: Arc<dyn RelayLink>,
        mut inbound: RelayInbound,
        connector: Arc<dyn Connector>,
    ) -> GratiaResult<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| GratiaError::InvalidConfig(format!("no tokio runtime: {e}")))?;

        let bus = Arc::new_cyclic(|me| MeshBus {
            config,
            relay,
            connector,
            runtime,
            state: Mutex::new(MeshState {
                closed: false,
                next_epoch: 0,
                peers: HashMap::new(),
            }),
            listeners: ListenerSet::new(),
            relay_task: Mutex::new(None),
            me: me.clone(),
        });

        let weak = Arc::downgrade(&bus);
        let task = bus.runtime.spawn(async move {
            while let Some(msg) = inbound.recv().await {
                match weak.upgrade() {
                    Some(bus) => bus.handle_relay(msg),
                    None => break,
                }
            }
        });
        *bus.relay_task.lock() = Some(task);

        bus.relay.send(RelayMessage::Hello {
            room: bus.config.room.clone(),
            peer_id: bus.config.peer_id.clone(),
        })?;
        tracing::info!(peer = %bus.config.peer_id, room = %bus.config.room, "joined mesh room");
        Ok(bus)
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.config.peer_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> MeshStats {
        let state = self.state.lock();
        MeshStats {
            peers: state.peers.values().filter(|e| e.connection.is_some()).count(),
            channels: state
                .peers
                .values()
                .filter(|e| e.channel.as_ref().is_some_and(|c| c.is_open()))
                .count(),
        }
    }

    /// Remote peers currently tracked, in any state
    pub fn known_peers(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn peer_state(&self, peer: &PeerId) -> Option<PeerState> {
        self.state.lock().peers.get(peer).map(|e| e.state)
    }

    /// Peers with an open channel, sorted
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let state = self.state.lock();
        let mut peers: Vec<PeerId> = state
            .peers
            .iter()
            .filter(|(_, e)| e.channel.as_ref().is_some_and(|c| c.is_open()))
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Close the relay link, every connection and channel, and drop all
    /// subscribers; nothing is delivered afterwards
    pub fn close(&self) {
        let peers = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.peers)
        };
        if let Some(task) = self.relay_task.lock().take() {
            task.abort();
        }
        self.relay.close();

        for (_, entry) in peers {
            if let Some(channel) = entry.channel {
                channel.close();
            }
            if let Some(connection) = entry.connection {
                connection.close();
            }
        }
        self.listeners.clear();
        tracing::info!(peer = %self.config.peer_id, "mesh closed");
    }

    fn handle_relay(&self, msg: RelayMessage) {
        if self.is_closed() {
            return;
        }
        if let Some(to) = msg.to() {
            if *to != self.config.peer_id {
                tracing::trace!(%to, "relay message for another peer");
                return;
            }
        }

        match msg {
            RelayMessage::Peers { list } => {
                self.prune_departed(&list);
                for peer in list {
                    self.maybe_dial(peer);
                }
            }
            RelayMessage::Offer { from, sdp, .. } => self.command(from, PeerCommand::Offer(sdp)),
            RelayMessage::Answer { from, sdp, .. } => {
                // An answer only makes sense for a peer we dialed
                if self.state.lock().peers.contains_key(&from) {
                    self.command(from, PeerCommand::Answer(sdp));
                }
            }
            RelayMessage::Candidate { from, candidate, .. } => {
                self.command(from, PeerCommand::Candidate(candidate))
            }
            RelayMessage::Hello { .. } => {}
        }
    }

    /// Forget peers that left the room and hold no live channel; dropping an
    /// entry's command sender ends its worker
    fn prune_departed(&self, present: &[PeerId]) {
        let present: HashSet<&PeerId> = present.iter().collect();
        let departed: Vec<(PeerId, PeerEntry)> = {
            let mut state = self.state.lock();
            let gone: Vec<PeerId> = state
                .peers
                .iter()
                .filter(|(id, e)| e.state != PeerState::Connected && !present.contains(id))
                .map(|(id, _)| id.clone())
                .collect();
            gone.into_iter()
                .filter_map(|id| state.peers.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (peer, entry) in departed {
            tracing::debug!(%peer, "forgetting departed peer");
            if let Some(channel) = entry.channel {
                channel.close();
            }
            if let Some(connection) = entry.connection {
                connection.close();
            }
        }
    }

    fn maybe_dial(&self, peer: PeerId) {
        if peer == self.config.peer_id {
            return;
        }
        let mut state = self.state.lock();
        let existing = state.peers.get(&peer).map(|e| e.state);
        if !should_dial(&self.config.peer_id, &peer, existing) {
            return;
        }
        tracing::debug!(%peer, "dialing");
        let entry = self.entry(&mut state, peer);
        entry.state = PeerState::Negotiating;
        let _ = entry.commands.send(PeerCommand::Dial);
    }

    /// Route a command to the peer's worker, creating it on first contact
    fn command(&self, peer: PeerId, command: PeerCommand) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let entry = self.entry(&mut state, peer);
        let _ = entry.commands.send(command);
    }

    fn entry<'a>(&self, state: &'a mut MeshState, peer: PeerId) -> &'a mut PeerEntry {
        state.peers.entry(peer.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = PeerWorker {
                bus: self.me.clone(),
                connector: Arc::clone(&self.connector),
                session: PeerSession::new(self.config.peer_id.clone(), peer),
                label: self.config.channel_label.clone(),
                epoch: 0,
            };
            self.runtime.spawn(worker.run(rx));
            PeerEntry {
                epoch: 0,
                state: PeerState::Idle,
                commands: tx,
                connection: None,
                channel: None,
            }
        })
    }

    /// Start a new connection attempt for `peer`, returning its epoch
    fn begin_attempt(&self, peer: &PeerId) -> Option<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return None;
        }
        let entry = state.peers.get_mut(peer)?;
        state.next_epoch += 1;
        entry.epoch = state.next_epoch;
        entry.state = PeerState::Negotiating;
        entry.connection = None;
        entry.channel = None;
        Some(entry.epoch)
    }

    /// Apply `update` if `epoch` is still the peer's current attempt
    fn update_entry<R>(
        &self,
        peer: &PeerId,
        epoch: u64,
        update: impl FnOnce(&mut PeerEntry) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        match state.peers.get_mut(peer) {
            Some(entry) if entry.epoch == epoch => Some(update(entry)),
            _ => None,
        }
    }

    fn is_current(&self, peer: &PeerId, epoch: u64) -> bool {
        let state = self.state.lock();
        !state.closed && state.peers.get(peer).is_some_and(|e| e.epoch == epoch)
    }

    fn events_for(&self, peer: &PeerId, epoch: u64) -> PeerEvents {
        Arc::new(MeshPeerEvents {
            bus: self.me.clone(),
            remote: peer.clone(),
            epoch,
        })
    }

    fn deliver(&self, peer: &PeerId, text: &str) {
        match SignalFrame::decode(text.as_bytes()) {
            Ok(signal) => self.listeners.notify(&signal),
            Err(e) => tracing::trace!(%peer, error = %e, "dropping frame"),
        }
    }

    fn send_relay(&self, msg: RelayMessage) {
        if let Err(e) = self.relay.send(msg) {
            tracing::debug!(error = %e, "relay send failed");
        }
    }
}

impl SignalChannel for MeshBus {
    fn send(&self, signal: &GratiaSignal) -> GratiaResult<()> {
        let channels: Vec<Arc<dyn DataChannel>> = {
            let state = self.state.lock();
            if state.closed {
                return Err(GratiaError::ChannelClosed);
            }
            state
                .peers
                .values()
                .filter_map(|e| e.channel.clone())
                .filter(|c| c.is_open())
                .collect()
        };
        if channels.is_empty() {
            return Ok(());
        }

        let frame = SignalFrame::encode(signal)?;
        for channel in channels {
            if let Err(e) = channel.send_text(&frame) {
                tracing::trace!(error = %e, "channel send failed");
            }
        }
        Ok(())
    }

    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        if self.is_closed() {
            return Subscription::noop();
        }
        self.listeners.subscribe(move |signal| handler(signal))
    }
}

impl Drop for MeshBus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connection callbacks for one attempt with one peer
struct MeshPeerEvents {
    bus: Weak<MeshBus>,
    remote: PeerId,
    epoch: u64,
}

impl MeshPeerEvents {
    fn current(&self) -> Option<Arc<MeshBus>> {
        self.bus
            .upgrade()
            .filter(|bus| bus.is_current(&self.remote, self.epoch))
    }
}

impl PeerEventSink for MeshPeerEvents {
    fn local_candidate(&self, candidate: Candidate) {
        if let Some(bus) = self.current() {
            bus.send_relay(RelayMessage::Candidate {
                from: bus.config.peer_id.clone(),
                to: self.remote.clone(),
                candidate,
            });
        }
    }

    fn channel_opened(&self, channel: Arc<dyn DataChannel>) {
        if let Some(bus) = self.current() {
            bus.command(
                self.remote.clone(),
                PeerCommand::Opened {
                    epoch: self.epoch,
                    channel,
                },
            );
        }
    }

    fn message(&self, text: &str) {
        if let Some(bus) = self.current() {
            bus.deliver(&self.remote, text);
        }
    }

    fn channel_closed(&self) {
        self.failed("channel closed");
    }

    fn failed(&self, reason: &str) {
        if let Some(bus) = self.current() {
            bus.command(
                self.remote.clone(),
                PeerCommand::Lost {
                    epoch: self.epoch,
                    reason: reason.to_string(),
                },
            );
        }
    }
}

/// Task owning one peer's session
struct PeerWorker {
    bus: Weak<MeshBus>,
    connector: Arc<dyn Connector>,
    session: PeerSession,
    label: String,
    epoch: u64,
}

impl PeerWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PeerCommand>) {
        while let Some(command) = commands.recv().await {
            if !self.step(command).await {
                break;
            }
        }
        self.session.close();
    }

    async fn step(&mut self, command: PeerCommand) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        if bus.is_closed() {
            return false;
        }
        let remote = self.session.remote().clone();

        match command {
            PeerCommand::Dial => {
                let Some(epoch) = bus.begin_attempt(&remote) else {
                    return false;
                };
                self.epoch = epoch;
                let events = bus.events_for(&remote, epoch);
                drop(bus);

                let result = self
                    .session
                    .initiate(self.connector.as_ref(), events, &self.label)
                    .await;
                self.register();
                match result {
                    Ok(offer) => self.send(RelayMessage::Offer {
                        from: self.session.local().clone(),
                        to: remote,
                        sdp: offer,
                    }),
                    Err(e) => self.fail(e.to_string()),
                }
            }
            PeerCommand::Offer(offer) => {
                let Some(epoch) = bus.begin_attempt(&remote) else {
                    return false;
                };
                self.epoch = epoch;
                let events = bus.events_for(&remote, epoch);
                drop(bus);

                let result = self
                    .session
                    .accept_offer(self.connector.as_ref(), events, offer)
                    .await;
                self.register();
                match result {
                    Ok(answer) => self.send(RelayMessage::Answer {
                        from: self.session.local().clone(),
                        to: remote,
                        sdp: answer,
                    }),
                    Err(e) => self.fail(e.to_string()),
                }
            }
            PeerCommand::Answer(answer) => {
                drop(bus);
                if let Err(e) = self.session.accept_answer(answer).await {
                    self.fail(e.to_string());
                }
            }
            PeerCommand::Candidate(candidate) => {
                drop(bus);
                self.session.add_candidate(candidate).await;
            }
            PeerCommand::Opened { epoch, channel } => {
                if epoch != self.epoch {
                    channel.close();
                    return true;
                }
                self.session.mark_connected();
                let connected = bus
                    .update_entry(&remote, epoch, |entry| {
                        entry.state = PeerState::Connected;
                        entry.channel = Some(Arc::clone(&channel));
                    })
                    .is_some();
                if connected {
                    tracing::info!(peer = %remote, "peer connected");
                } else {
                    channel.close();
                }
            }
            PeerCommand::Lost { epoch, reason } => {
                if epoch == self.epoch {
                    drop(bus);
                    self.fail(reason);
                }
            }
        }
        true
    }

    /// Publish the session's connection on the bus entry
    fn register(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let connection = self.session.connection().cloned();
        bus.update_entry(self.session.remote(), self.epoch, |entry| {
            entry.connection = connection;
        });
    }

    /// Send on behalf of the current attempt only
    fn send(&self, msg: RelayMessage) {
        if let Some(bus) = self
            .bus
            .upgrade()
            .filter(|bus| bus.is_current(self.session.remote(), self.epoch))
        {
            bus.send_relay(msg);
        }
    }

    /// Give up on the current attempt; the next `peers` list may dial again
    fn fail(&mut self, reason: String) {
        let remote = self.session.remote().clone();
        tracing::debug!(peer = %remote, %reason, "peer connection lost");
        self.session.close();
        let channel = self.bus.upgrade().and_then(|bus| {
            bus.update_entry(&remote, self.epoch, |entry| {
                entry.state = PeerState::Closed;
                entry.connection = None;
                entry.channel.take()
            })
        });
        if let Some(channel) = channel.flatten() {
            channel.close();
        }
    }
}

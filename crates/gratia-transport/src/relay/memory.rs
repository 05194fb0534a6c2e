//! In-process relay

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gratia_core::{GratiaError, GratiaResult, PeerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{Delivery, LinkId, RelayInbound, RelayLink, RelayMessage, RelayRooms};

/// Room routing plus the outbound queue of every attached link
///
/// Shared by the in-memory relay and the TCP relay server.
#[derive(Default)]
pub struct RelaySwitch {
    rooms: RelayRooms,
    next_link: LinkId,
    outboxes: HashMap<LinkId, mpsc::UnboundedSender<RelayMessage>>,
}

impl RelaySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link and return its outbound queue
    pub fn attach(&mut self) -> (LinkId, mpsc::UnboundedReceiver<RelayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_link += 1;
        let link = self.next_link;
        self.outboxes.insert(link, tx);
        (link, rx)
    }

    pub fn handle(&mut self, link: LinkId, msg: RelayMessage) {
        if !self.outboxes.contains_key(&link) {
            return;
        }
        let out = self.rooms.handle(link, msg);
        self.deliver(out);
    }

    pub fn detach(&mut self, link: LinkId) {
        if self.outboxes.remove(&link).is_none() {
            return;
        }
        let out = self.rooms.leave(link);
        self.deliver(out);
    }

    pub fn rooms(&self) -> &RelayRooms {
        &self.rooms
    }

    fn deliver(&mut self, out: Vec<Delivery>) {
        for (link, msg) in out {
            if let Some(outbox) = self.outboxes.get(&link) {
                if outbox.send(msg).is_err() {
                    tracing::trace!(link, "relay outbox gone");
                }
            }
        }
    }
}

/// Relay running inside the current process
#[derive(Clone, Default)]
pub struct MemoryRelay {
    switch: Arc<Mutex<RelaySwitch>>,
    log: Arc<Mutex<Vec<RelayMessage>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new link to this relay
    pub fn connect(&self) -> (Arc<dyn RelayLink>, RelayInbound) {
        let (id, inbound) = self.switch.lock().attach();
        let link = MemoryRelayLink {
            id,
            relay: self.clone(),
            closed: AtomicBool::new(false),
        };
        (Arc::new(link), inbound)
    }

    /// Every message received so far, in arrival order
    pub fn history(&self) -> Vec<RelayMessage> {
        self.log.lock().clone()
    }

    pub fn peers_in(&self, room: &str) -> Vec<PeerId> {
        self.switch.lock().rooms().peers_in(room)
    }
}

struct MemoryRelayLink {
    id: LinkId,
    relay: MemoryRelay,
    closed: AtomicBool,
}

impl RelayLink for MemoryRelayLink {
    fn send(&self, msg: RelayMessage) -> GratiaResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GratiaError::RelayUnavailable);
        }
        self.relay.log.lock().push(msg.clone());
        self.relay.switch.lock().handle(self.id, msg);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.relay.switch.lock().detach(self.id);
        }
    }
}

impl Drop for MemoryRelayLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(peer: &str) -> RelayMessage {
        RelayMessage::Hello {
            room: "r".into(),
            peer_id: PeerId::from(peer),
        }
    }

    #[tokio::test]
    async fn test_links_exchange_through_relay() {
        let relay = MemoryRelay::new();
        let (a, mut a_in) = relay.connect();
        let (b, mut b_in) = relay.connect();

        a.send(hello("a")).unwrap();
        b.send(hello("b")).unwrap();

        let peers = vec![PeerId::from("a"), PeerId::from("b")];
        assert_eq!(a_in.recv().await, Some(RelayMessage::Peers { list: vec![PeerId::from("a")] }));
        assert_eq!(a_in.recv().await, Some(RelayMessage::Peers { list: peers.clone() }));
        assert_eq!(b_in.recv().await, Some(RelayMessage::Peers { list: peers }));
        assert_eq!(relay.history().len(), 2);
    }

    #[tokio::test]
    async fn test_close_ends_stream_and_updates_room() {
        let relay = MemoryRelay::new();
        let (a, mut a_in) = relay.connect();
        let (b, mut b_in) = relay.connect();
        a.send(hello("a")).unwrap();
        b.send(hello("b")).unwrap();
        while b_in.try_recv().is_ok() {}

        a.close();
        assert!(matches!(a.send(hello("a")), Err(GratiaError::RelayUnavailable)));
        assert_eq!(relay.peers_in("r"), vec![PeerId::from("b")]);
        assert_eq!(b_in.recv().await, Some(RelayMessage::Peers { list: vec![PeerId::from("b")] }));

        // Drain what was queued before the close, then the stream ends
        while a_in.recv().await.is_some() {}
    }
}

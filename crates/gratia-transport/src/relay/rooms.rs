//! Room registry and message routing for the relay
//!
//! Pure state: every operation returns the deliveries it produces, and the
//! caller owns the actual links.

use std::collections::{BTreeSet, HashMap};

use gratia_core::PeerId;

use crate::RelayMessage;

/// Relay-side identifier of one connected link
pub type LinkId = u64;

/// Message bound for one link
pub type Delivery = (LinkId, RelayMessage);

#[derive(Clone, Debug)]
struct Member {
    room: String,
    peer: PeerId,
}

#[derive(Debug, Default)]
pub struct RelayRooms {
    members: HashMap<LinkId, Member>,
    rooms: HashMap<String, BTreeSet<LinkId>>,
}

impl RelayRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one message from a link
    pub fn handle(&mut self, link: LinkId, msg: RelayMessage) -> Vec<Delivery> {
        match msg {
            RelayMessage::Hello { room, peer_id } => self.join(link, room, peer_id),
            RelayMessage::Peers { .. } => Vec::new(),
            routed => self.route(link, routed),
        }
    }

    /// Put a link into a room, leaving any previous one
    pub fn join(&mut self, link: LinkId, room: String, peer: PeerId) -> Vec<Delivery> {
        let mut out = self.leave(link);
        self.members.insert(
            link,
            Member {
                room: room.clone(),
                peer,
            },
        );
        self.rooms.entry(room.clone()).or_default().insert(link);
        out.extend(self.membership(&room));
        out
    }

    /// Remove a link; remaining room members receive the new membership
    pub fn leave(&mut self, link: LinkId) -> Vec<Delivery> {
        let Some(member) = self.members.remove(&link) else {
            return Vec::new();
        };
        let now_empty = match self.rooms.get_mut(&member.room) {
            Some(links) => {
                links.remove(&link);
                links.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.rooms.remove(&member.room);
            return Vec::new();
        }
        self.membership(&member.room)
    }

    /// Forward a negotiation message to its addressee within the sender's room
    pub fn route(&self, link: LinkId, msg: RelayMessage) -> Vec<Delivery> {
        let Some(sender) = self.members.get(&link) else {
            return Vec::new();
        };
        let Some(to) = msg.to() else {
            return Vec::new();
        };
        self.rooms
            .get(&sender.room)
            .into_iter()
            .flatten()
            .filter(|l| **l != link && self.members.get(l).is_some_and(|m| &m.peer == to))
            .map(|l| (*l, msg.clone()))
            .collect()
    }

    /// Peer ids present in a room, sorted and deduplicated
    pub fn peers_in(&self, room: &str) -> Vec<PeerId> {
        let set: BTreeSet<&PeerId> = self
            .rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|l| self.members.get(l).map(|m| &m.peer))
            .collect();
        set.into_iter().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn link_count(&self) -> usize {
        self.members.len()
    }

    fn membership(&self, room: &str) -> Vec<Delivery> {
        let list = self.peers_in(room);
        self.rooms
            .get(room)
            .into_iter()
            .flatten()
            .map(|l| (*l, RelayMessage::Peers { list: list.clone() }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionDescription;
    use proptest::prelude::*;

    fn hello(room: &str, peer: &str) -> RelayMessage {
        RelayMessage::Hello {
            room: room.into(),
            peer_id: PeerId::from(peer),
        }
    }

    fn offer(from: &str, to: &str) -> RelayMessage {
        RelayMessage::Offer {
            from: PeerId::from(from),
            to: PeerId::from(to),
            sdp: SessionDescription::offer("x"),
        }
    }

    fn ids(list: &[&str]) -> Vec<PeerId> {
        list.iter().map(|s| PeerId::from(*s)).collect()
    }

    #[test]
    fn test_hello_broadcasts_membership() {
        let mut rooms = RelayRooms::new();
        assert_eq!(
            rooms.handle(1, hello("r", "zeno")),
            vec![(1, RelayMessage::Peers { list: ids(&["zeno"]) })]
        );

        let out = rooms.handle(2, hello("r", "alice"));
        let expected = RelayMessage::Peers {
            list: ids(&["alice", "zeno"]),
        };
        assert_eq!(out, vec![(1, expected.clone()), (2, expected)]);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let mut rooms = RelayRooms::new();
        rooms.handle(1, hello("a", "p"));
        let out = rooms.handle(2, hello("b", "q"));
        assert_eq!(out, vec![(2, RelayMessage::Peers { list: ids(&["q"]) })]);
        assert!(rooms.route(1, offer("p", "q")).is_empty());
    }

    #[test]
    fn test_route_by_addressee() {
        let mut rooms = RelayRooms::new();
        rooms.handle(1, hello("r", "alice"));
        rooms.handle(2, hello("r", "bob"));
        rooms.handle(3, hello("r", "carol"));

        let out = rooms.handle(1, offer("alice", "carol"));
        assert_eq!(out, vec![(3, offer("alice", "carol"))]);

        assert!(rooms.handle(1, offer("alice", "nobody")).is_empty());
    }

    #[test]
    fn test_unjoined_link_cannot_route() {
        let mut rooms = RelayRooms::new();
        rooms.handle(1, hello("r", "alice"));
        assert!(rooms.handle(9, offer("mallory", "alice")).is_empty());
    }

    #[test]
    fn test_leave_rebroadcasts() {
        let mut rooms = RelayRooms::new();
        rooms.handle(1, hello("r", "alice"));
        rooms.handle(2, hello("r", "bob"));

        assert_eq!(
            rooms.leave(1),
            vec![(2, RelayMessage::Peers { list: ids(&["bob"]) })]
        );
        assert!(rooms.leave(2).is_empty());
        assert_eq!(rooms.room_count(), 0);
        assert_eq!(rooms.link_count(), 0);
    }

    #[test]
    fn test_rejoin_moves_rooms() {
        let mut rooms = RelayRooms::new();
        rooms.handle(1, hello("a", "p"));
        rooms.handle(2, hello("a", "q"));
        let out = rooms.handle(1, hello("b", "p"));

        assert!(out.contains(&(2, RelayMessage::Peers { list: ids(&["q"]) })));
        assert!(out.contains(&(1, RelayMessage::Peers { list: ids(&["p"]) })));
        assert_eq!(rooms.peers_in("a"), ids(&["q"]));
    }

    #[test]
    fn test_client_peers_message_ignored() {
        let mut rooms = RelayRooms::new();
        rooms.handle(1, hello("r", "p"));
        assert!(rooms.handle(1, RelayMessage::Peers { list: ids(&["x"]) }).is_empty());
    }

    proptest! {
        #[test]
        fn prop_membership_matches_joins(ops in proptest::collection::vec((0u64..6, 0u8..3, any::<bool>()), 0..40)) {
            let mut rooms = RelayRooms::new();
            let mut model: HashMap<LinkId, (String, PeerId)> = HashMap::new();
            for (link, room, join) in ops {
                let room = format!("room{room}");
                if join {
                    let peer = PeerId::new(format!("peer{link}"));
                    rooms.join(link, room.clone(), peer.clone());
                    model.insert(link, (room, peer));
                } else {
                    rooms.leave(link);
                    model.remove(&link);
                }
            }
            prop_assert_eq!(rooms.link_count(), model.len());
            for r in 0..3 {
                let room = format!("room{r}");
                let mut expected: Vec<PeerId> = model
                    .values()
                    .filter(|(rm, _)| *rm == room)
                    .map(|(_, p)| p.clone())
                    .collect();
                expected.sort();
                prop_assert_eq!(rooms.peers_in(&room), expected);
            }
        }
    }
}

//! Per-peer negotiation state
//!
//! A session is owned by exactly one task and driven with `&mut self`, so the
//! operations for one peer are applied strictly in the order they arrive.
//! Candidates that arrive before the remote description are queued and
//! flushed once, in arrival order, right after it is applied.

use std::collections::VecDeque;
use std::sync::Arc;

use gratia_core::{GratiaError, GratiaResult, PeerId};

use crate::{Candidate, Connector, PeerConnection, PeerEvents, SessionDescription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

pub struct PeerSession {
    local: PeerId,
    remote: PeerId,
    state: PeerState,
    connection: Option<Arc<dyn PeerConnection>>,
    remote_applied: bool,
    pending: VecDeque<Candidate>,
}

impl PeerSession {
    pub fn new(local: PeerId, remote: PeerId) -> Self {
        PeerSession {
            local,
            remote,
            state: PeerState::Idle,
            connection: None,
            remote_applied: false,
            pending: VecDeque::new(),
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn connection(&self) -> Option<&Arc<dyn PeerConnection>> {
        self.connection.as_ref()
    }

    /// Candidates waiting for the remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Start as initiator: create the connection and an ordered channel,
    /// then produce and apply the offer. Returns the offer to send.
    ///
    /// Candidates queued before this call belong to an earlier attempt and
    /// are discarded.
    pub async fn initiate(
        &mut self,
        connector: &dyn Connector,
        events: PeerEvents,
        label: &str,
    ) -> GratiaResult<SessionDescription> {
        self.pending.clear();
        let connection = self.fresh_connection(connector, events)?;
        connection.open_channel(label, true)?;
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Answer a remote offer. Returns the answer to send.
    pub async fn accept_offer(
        &mut self,
        connector: &dyn Connector,
        events: PeerEvents,
        offer: SessionDescription,
    ) -> GratiaResult<SessionDescription> {
        let connection = self.fresh_connection(connector, events)?;
        self.apply_remote(&connection, offer).await?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    /// Apply the remote answer to an offer we sent
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> GratiaResult<()> {
        let connection = match (&self.connection, self.state, self.remote_applied) {
            (Some(connection), PeerState::Negotiating, false) => Arc::clone(connection),
            _ => {
                return Err(GratiaError::NegotiationFailed {
                    peer: self.remote.clone(),
                    reason: "answer without a pending offer".into(),
                })
            }
        };
        self.apply_remote(&connection, answer).await
    }

    /// Queue or apply a remote candidate; apply failures are swallowed
    pub async fn add_candidate(&mut self, candidate: Candidate) {
        if !self.remote_applied {
            self.pending.push_back(candidate);
            return;
        }
        if let Some(connection) = &self.connection {
            apply_candidate(connection.as_ref(), &self.remote, candidate).await;
        }
    }

    pub fn mark_connected(&mut self) {
        if self.state == PeerState::Negotiating {
            self.state = PeerState::Connected;
        }
    }

    /// Close the connection and drop queued candidates
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.pending.clear();
        self.remote_applied = false;
        self.state = PeerState::Closed;
    }

    fn fresh_connection(
        &mut self,
        connector: &dyn Connector,
        events: PeerEvents,
    ) -> GratiaResult<Arc<dyn PeerConnection>> {
        if let Some(previous) = self.connection.take() {
            previous.close();
        }
        self.remote_applied = false;
        let connection = connector.connect(&self.local, &self.remote, events)?;
        self.connection = Some(Arc::clone(&connection));
        self.state = PeerState::Negotiating;
        Ok(connection)
    }

    async fn apply_remote(
        &mut self,
        connection: &Arc<dyn PeerConnection>,
        desc: SessionDescription,
    ) -> GratiaResult<()> {
        connection.set_remote_description(desc).await?;
        while let Some(candidate) = self.pending.pop_front() {
            apply_candidate(connection.as_ref(), &self.remote, candidate).await;
        }
        self.remote_applied = true;
        Ok(())
    }
}

async fn apply_candidate(connection: &dyn PeerConnection, remote: &PeerId, candidate: Candidate) {
    if let Err(e) = connection.add_candidate(candidate).await {
        tracing::debug!(peer = %remote, error = %e, "candidate rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataChannel, PeerEventSink};
    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    /// Connection that only records what was asked of it
    struct ScriptedConnection {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnection {
        fn push(&self, entry: String) {
            self.log.lock().push(entry);
        }
    }

    impl PeerConnection for ScriptedConnection {
        fn create_offer(&self) -> BoxFuture<'_, GratiaResult<SessionDescription>> {
            Box::pin(async move {
                self.push("create_offer".into());
                Ok(SessionDescription::offer("o"))
            })
        }

        fn create_answer(&self) -> BoxFuture<'_, GratiaResult<SessionDescription>> {
            Box::pin(async move {
                self.push("create_answer".into());
                Ok(SessionDescription::answer("a"))
            })
        }

        fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, GratiaResult<()>> {
            Box::pin(async move {
                self.push(format!("local {}", desc.sdp));
                Ok(())
            })
        }

        fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, GratiaResult<()>> {
            Box::pin(async move {
                self.push(format!("remote {}", desc.sdp));
                if desc.sdp == "broken" {
                    return Err(GratiaError::InvalidWireFormat("broken".into()));
                }
                Ok(())
            })
        }

        fn add_candidate(&self, candidate: Candidate) -> BoxFuture<'_, GratiaResult<()>> {
            Box::pin(async move {
                self.push(format!("candidate {}", candidate.candidate));
                if candidate.candidate.starts_with("bad") {
                    return Err(GratiaError::TransportError("rejected".into()));
                }
                Ok(())
            })
        }

        fn open_channel(&self, label: &str, ordered: bool) -> GratiaResult<Arc<dyn DataChannel>> {
            self.push(format!("channel {label} ordered={ordered}"));
            Ok(Arc::new(NullChannel))
        }

        fn close(&self) {
            self.push("close".into());
        }
    }

    struct NullChannel;

    impl DataChannel for NullChannel {
        fn label(&self) -> &str {
            "null"
        }
        fn is_open(&self) -> bool {
            false
        }
        fn send_text(&self, _text: &str) -> GratiaResult<()> {
            Err(GratiaError::ChannelClosed)
        }
        fn close(&self) {}
    }

    struct ScriptedConnector {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Connector for ScriptedConnector {
        fn connect(
            &self,
            _local: &PeerId,
            remote: &PeerId,
            _events: PeerEvents,
        ) -> GratiaResult<Arc<dyn PeerConnection>> {
            self.log.lock().push(format!("connect {remote}"));
            Ok(Arc::new(ScriptedConnection {
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct Silent;

    impl PeerEventSink for Silent {
        fn local_candidate(&self, _candidate: Candidate) {}
        fn channel_opened(&self, _channel: Arc<dyn DataChannel>) {}
        fn message(&self, _text: &str) {}
        fn channel_closed(&self) {}
        fn failed(&self, _reason: &str) {}
    }

    fn setup() -> (PeerSession, ScriptedConnector, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector {
            log: Arc::clone(&log),
        };
        let session = PeerSession::new(PeerId::from("zeno"), PeerId::from("alice"));
        (session, connector, log)
    }

    fn take(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        std::mem::take(&mut *log.lock())
    }

    #[tokio::test]
    async fn test_candidates_queued_until_remote_description() {
        let (mut session, connector, log) = setup();

        session.add_candidate(Candidate::new("c1")).await;
        session.add_candidate(Candidate::new("c2")).await;
        assert_eq!(session.pending_candidates(), 2);
        assert!(take(&log).is_empty());

        let answer = session
            .accept_offer(&connector, Arc::new(Silent), SessionDescription::offer("o"))
            .await
            .unwrap();
        assert_eq!(answer, SessionDescription::answer("a"));
        assert_eq!(
            take(&log),
            vec![
                "connect alice",
                "remote o",
                "candidate c1",
                "candidate c2",
                "create_answer",
                "local a",
            ]
        );
        assert_eq!(session.pending_candidates(), 0);

        session.add_candidate(Candidate::new("c3")).await;
        assert_eq!(take(&log), vec!["candidate c3"]);
    }

    #[tokio::test]
    async fn test_initiator_flushes_on_answer() {
        let (mut session, connector, log) = setup();

        let offer = session
            .initiate(&connector, Arc::new(Silent), "gratia")
            .await
            .unwrap();
        assert_eq!(offer, SessionDescription::offer("o"));
        assert_eq!(session.state(), PeerState::Negotiating);
        assert_eq!(
            take(&log),
            vec!["connect alice", "channel gratia ordered=true", "create_offer", "local o"]
        );

        session.add_candidate(Candidate::new("c1")).await;
        assert!(take(&log).is_empty());

        session.accept_answer(SessionDescription::answer("a")).await.unwrap();
        assert_eq!(take(&log), vec!["remote a", "candidate c1"]);

        // A second answer for the same offer is refused
        assert!(session.accept_answer(SessionDescription::answer("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_redial_discards_stale_candidates() {
        let (mut session, connector, log) = setup();
        session
            .initiate(&connector, Arc::new(Silent), "gratia")
            .await
            .unwrap();
        session.add_candidate(Candidate::new("old")).await;
        assert_eq!(session.pending_candidates(), 1);

        session
            .initiate(&connector, Arc::new(Silent), "gratia")
            .await
            .unwrap();
        assert_eq!(session.pending_candidates(), 0);
        take(&log);

        session.add_candidate(Candidate::new("new")).await;
        session.accept_answer(SessionDescription::answer("a")).await.unwrap();
        assert_eq!(take(&log), vec!["remote a", "candidate new"]);
    }

    #[tokio::test]
    async fn test_candidate_failures_are_swallowed() {
        let (mut session, connector, log) = setup();
        session.add_candidate(Candidate::new("bad-1")).await;
        session.add_candidate(Candidate::new("c2")).await;

        session
            .accept_offer(&connector, Arc::new(Silent), SessionDescription::offer("o"))
            .await
            .unwrap();
        let log = take(&log);
        assert!(log.contains(&"candidate bad-1".to_string()));
        assert!(log.contains(&"candidate c2".to_string()));
    }

    #[tokio::test]
    async fn test_failed_remote_description_keeps_queue() {
        let (mut session, connector, _log) = setup();
        session.add_candidate(Candidate::new("c1")).await;

        let result = session
            .accept_offer(&connector, Arc::new(Silent), SessionDescription::offer("broken"))
            .await;
        assert!(result.is_err());
        assert_eq!(session.pending_candidates(), 1);

        session.close();
        assert_eq!(session.state(), PeerState::Closed);
        assert_eq!(session.pending_candidates(), 0);
        assert!(session.connection().is_none());
    }

    #[tokio::test]
    async fn test_answer_without_offer_refused() {
        let (mut session, _connector, _log) = setup();
        let err = session
            .accept_answer(SessionDescription::answer("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, GratiaError::NegotiationFailed { .. }));
    }

    #[tokio::test]
    async fn test_mark_connected_only_while_negotiating() {
        let (mut session, connector, _log) = setup();
        session.mark_connected();
        assert_eq!(session.state(), PeerState::Idle);

        session
            .initiate(&connector, Arc::new(Silent), "gratia")
            .await
            .unwrap();
        session.mark_connected();
        assert_eq!(session.state(), PeerState::Connected);
    }
}

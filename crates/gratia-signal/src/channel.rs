//! Signal channel capability and the in-process carrier

use gratia_core::{GratiaResult, GratiaSignal, ListenerSet, Subscription};

/// Inbound signal callback
pub type SignalHandler = Box<dyn Fn(&GratiaSignal) + Send + Sync>;

/// Duplex broadcast capability
///
/// Carriers are interchangeable: the adapter only ever sees this trait.
pub trait SignalChannel: Send + Sync {
    /// Broadcast a signal to every reachable peer
    fn send(&self, signal: &GratiaSignal) -> GratiaResult<()>;

    /// Receive signals from other peers
    fn subscribe(&self, handler: SignalHandler) -> Subscription;
}

/// In-process carrier; delivery is synchronous and includes the sender
#[derive(Clone, Default)]
pub struct LocalChannel {
    listeners: ListenerSet<GratiaSignal>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Detach every subscriber
    pub fn close(&self) {
        self.listeners.clear();
    }
}

impl SignalChannel for LocalChannel {
    fn send(&self, signal: &GratiaSignal) -> GratiaResult<()> {
        self.listeners.notify(signal);
        Ok(())
    }

    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        self.listeners.subscribe(move |signal| handler(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gratia_core::{PeerId, Timestamp};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_local_channel_delivers_to_all() {
        let channel = LocalChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let sink = Arc::clone(&seen);
            let _ = channel.subscribe(Box::new(move |s| sink.lock().push(s.id.clone())));
        }

        let signal = GratiaSignal::neutral(PeerId::from("a"), Timestamp::ZERO);
        channel.send(&signal).unwrap();

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_close_detaches() {
        let channel = LocalChannel::new();
        let _ = channel.subscribe(Box::new(|_| {}));
        assert_eq!(channel.subscriber_count(), 1);
        channel.close();
        assert_eq!(channel.subscriber_count(), 0);
    }
}

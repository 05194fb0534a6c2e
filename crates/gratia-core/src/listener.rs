//! Listener sets and subscriptions
//!
//! Listeners are invoked outside the set's lock, so a listener may subscribe,
//! unsubscribe or publish again without deadlocking.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Shared callback
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by every `subscribe`/`on` call
///
/// The listener stays attached until `unsubscribe` is called; dropping the
/// handle does not detach it.
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription that detaches nothing
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct ListenerTable<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Ordered set of listeners for values of type `T`
pub struct ListenerSet<T> {
    table: Arc<Mutex<ListenerTable<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Self {
        ListenerSet {
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Attach a listener; notification order is subscription order
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut table = self.table.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerTable<T>>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = weak.upgrade() {
                table.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every listener with `value`
    pub fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .table
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(value);
        }
    }

    /// Detach every listener
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }
}

impl<T: 'static> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        ListenerSet {
            table: Arc::clone(&self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_in_subscription_order() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        let _s1 = set.subscribe(move |v| a.lock().push(("a", *v)));
        let b = Arc::clone(&seen);
        let _s2 = set.subscribe(move |v| b.lock().push(("b", *v)));

        set.notify(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let set = ListenerSet::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let sub = set.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        set.notify(&());
        sub.unsubscribe();
        set.notify(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let set = ListenerSet::<()>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&slot);
        let sub = set.subscribe(move |_| {
            if let Some(sub) = inner.lock().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        set.notify(&());
        assert!(set.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = ListenerSet::<()>::new();
        let sub = set.subscribe(|_| {});
        drop(set);
        sub.unsubscribe();
    }
}

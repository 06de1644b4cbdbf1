use std::sync::Arc;

use parking_lot::Mutex;

use super::state::SessionEvent;

/// Handle returned by [`SessionManager::subscribe`](crate::SessionManager::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Registered observers, called in subscription order.
#[derive(Default)]
pub(crate) struct Observers {
    entries: Mutex<Vec<(Subscription, Callback)>>,
    next_id: Mutex<u64>,
}

impl Observers {
    pub(crate) fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            Subscription(*next)
        };
        self.entries.lock().push((id, Arc::new(callback)));
        id
    }

    pub(crate) fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(id, _)| *id != subscription);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Call every observer with `event`.
    ///
    /// The registry lock is released first, so observers may subscribe,
    /// unsubscribe, or read the session.
    pub(crate) fn notify(&self, event: &SessionEvent) {
        let callbacks: Vec<Callback> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_and_unsubscribe() {
        let observers = Observers::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = observers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observers.notify(&SessionEvent::TokenRefreshed);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&SessionEvent::TokenRefreshed);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

//! Typed observer registries.
//!
//! The session surfaces events through four independent listener sets
//! (state, message, error, audio stream) plus the one-shot notice side
//! channel. Registration returns a [`Subscription`] whose `cancel()`
//! removes the listener; the caller must retain it to unsubscribe later.
//! There is no ordering guarantee across sets, but within a set listeners
//! are notified in registration order. A panicking listener is contained
//! and logged; delivery continues to the remaining listeners.

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;
type ListenerList<E> = Arc<Mutex<Vec<(u64, Listener<E>)>>>;

/// Callback for the user-facing notice side channel.
pub type NoticeCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A set of listeners for one event type.
pub struct ObserverRegistry<E> {
    listeners: ListenerList<E>,
    next_id: AtomicU64,
    name: &'static str,
}

impl<E: 'static> ObserverRegistry<E> {
    /// Create an empty registry. `name` appears in panic logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            name,
        }
    }

    /// Add a listener. The returned subscription removes it on `cancel()`.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));

        let weak: Weak<Mutex<Vec<(u64, Listener<E>)>>> = Arc::downgrade(&self.listeners);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    list.lock().retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Notify every listener, in registration order. The listener list is
    /// snapshotted first so listeners may subscribe/cancel reentrantly.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(registry = self.name, "listener panicked; continuing");
            }
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`ObserverRegistry::subscribe`].
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove the listener from its registry. No-op if the registry is
    /// already gone.
    pub fn cancel(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_notify_in_order() {
        let registry = ObserverRegistry::<u32>::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = registry.subscribe(move |v| o1.lock().push(("first", *v)));
        let o2 = order.clone();
        let _s2 = registry.subscribe(move |v| o2.lock().push(("second", *v)));

        registry.notify(&7);
        let seen = order.lock().clone();
        assert_eq!(seen, vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_cancel_removes_listener() {
        let registry = ObserverRegistry::<()>::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = registry.subscribe(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.len(), 1);

        registry.notify(&());
        sub.cancel();
        registry.notify(&());

        assert_eq!(registry.len(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let registry = ObserverRegistry::<()>::new("test");
        let reached = Arc::new(AtomicUsize::new(0));

        let _s1 = registry.subscribe(|()| panic!("bad listener"));
        let r = reached.clone();
        let _s2 = registry.subscribe(move |()| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let registry = ObserverRegistry::<()>::new("test");
        let _s1 = registry.subscribe(|()| {});
        let _s2 = registry.subscribe(|()| {});
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_after_registry_dropped_is_noop() {
        let registry = ObserverRegistry::<()>::new("test");
        let sub = registry.subscribe(|()| {});
        drop(registry);
        sub.cancel();
    }
}

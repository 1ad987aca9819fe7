//! Connectivity tracking.
//!
//! The [`NetworkMonitor`] holds the current online flag. Whatever knows about
//! connectivity (an OS hook, the heartbeat probe, a test) calls
//! [`NetworkMonitor::set_online`]; transitions fan out to callback
//! subscribers and to `watch` receivers.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Transitions waiting to reach the callback listeners, in state order.
#[derive(Default)]
struct Dispatch {
    pending: VecDeque<bool>,
    running: bool,
}

struct Inner {
    state: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    dispatch: Mutex<Dispatch>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: u64) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Shared connectivity state. Cheap to clone; clones observe the same state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(Vec::new()),
                dispatch: Mutex::new(Dispatch::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Record the current connectivity. Repeating the current state is a
    /// no-op; a transition notifies every subscriber. Returns `true` on a
    /// transition.
    ///
    /// Listeners see transitions in the order the state changed, so the
    /// last callback always matches [`is_online`](Self::is_online). When
    /// another caller (or a listener calling back in) is already notifying,
    /// the transition is queued and delivered by that caller.
    pub fn set_online(&self, online: bool) -> bool {
        let mut dispatch = self.inner.dispatch.lock().unwrap_or_else(|e| e.into_inner());

        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::info!(online, "Connectivity changed");
        dispatch.pending.push_back(online);
        if dispatch.running {
            return true;
        }
        dispatch.running = true;

        while let Some(next) = dispatch.pending.pop_front() {
            drop(dispatch);
            self.notify(next);
            dispatch = self.inner.dispatch.lock().unwrap_or_else(|e| e.into_inner());
        }
        dispatch.running = false;
        true
    }

    fn notify(&self, online: bool) {
        // Snapshot so a listener may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = {
            let guard = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(online))).is_err() {
                tracing::error!(online, "Connectivity listener panicked");
            }
        }
    }

    /// Register a callback for connectivity transitions. The callback stays
    /// registered until the returned [`Subscription`] is dropped or
    /// unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));

        Subscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Receiver for async consumers. Starts at the current state.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Handle to a registered listener.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    monitor: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.remove(self.id);
        }
    }
}

//! Snapshot broadcast to queue observers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use offload_protocol::TransferItem;
use tracing::warn;

type Listener = Arc<dyn Fn(&[TransferItem]) + Send + Sync>;

struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    listener: Listener,
}

#[derive(Default)]
struct BusInner {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.id != id);
    }
}

/// Delivers queue snapshots to subscribers in subscription order.
#[derive(Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. It stays registered while the returned
    /// [`Subscription`] is alive.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[TransferItem]) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.inner.entries.lock().unwrap().push(Entry {
            id,
            active: Arc::clone(&active),
            listener: Arc::new(listener),
        });
        Subscription {
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Sends `snapshot` to every live listener.
    ///
    /// Iterates over a copy of the listener list, so listeners may
    /// subscribe or unsubscribe from inside the callback. A listener
    /// removed mid-broadcast is skipped if it has not been called yet.
    /// A panicking listener is logged and does not stop delivery.
    pub fn broadcast(&self, snapshot: &[TransferItem]) {
        let targets: Vec<(u64, Arc<AtomicBool>, Listener)> = {
            let entries = self.inner.entries.lock().unwrap();
            entries
                .iter()
                .map(|e| (e.id, Arc::clone(&e.active), Arc::clone(&e.listener)))
                .collect()
        };

        for (id, active, listener) in targets {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                warn!(listener = id, "queue listener panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }
}

/// Registration handle returned by [`NotificationBus::subscribe`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

//! Coalescing "session changed" notifications for the presentation layer.
//!
//! `publish` is non-blocking and callable from any thread. The first publish
//! for a key opens a coalescing window; when it closes, subscribers get the
//! latest snapshot of every key published in the meantime. Per key, snapshots
//! arrive in revision order and the final state is always delivered.

use crate::common::{SessionKey, TransferRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

type Listener = Arc<dyn Fn(&TransferRecord) + Send + Sync>;

struct Inner {
    pending: DashMap<SessionKey, TransferRecord>,
    delivered: DashMap<SessionKey, u64>,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    wake: mpsc::UnboundedSender<SessionKey>,
}

impl Inner {
    fn listeners(&self) -> Vec<Listener> {
        let guard = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Listener list lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.iter().map(|(_, listener)| listener.clone()).collect()
    }

    fn unsubscribe(&self, id: u64) {
        let mut guard = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Listener list lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.retain(|(listener_id, _)| *listener_id != id);
    }

    fn deliver(&self, keys: &[SessionKey]) {
        let listeners = self.listeners();
        for key in keys {
            let Some((_, snapshot)) = self.pending.remove(key) else {
                continue;
            };

            let fresh = match self.delivered.entry(*key) {
                Entry::Occupied(mut seen) => {
                    if *seen.get() >= snapshot.revision {
                        false
                    } else {
                        seen.insert(snapshot.revision);
                        true
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(snapshot.revision);
                    true
                }
            };
            if !fresh {
                continue;
            }

            tracing::debug!(
                key = %snapshot.key,
                status = %snapshot.status,
                percentage = snapshot.percentage,
                "Delivering session change"
            );
            for listener in &listeners {
                listener(&snapshot);
            }
        }
    }
}

async fn flush_loop(inner: Weak<Inner>, window: Duration, mut wake: mpsc::UnboundedReceiver<SessionKey>) {
    while let Some(first) = wake.recv().await {
        if !window.is_zero() {
            tokio::time::sleep(window).await;
        }

        let mut keys = vec![first];
        while let Ok(key) = wake.try_recv() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.deliver(&keys);
    }
    tracing::debug!("Change notifier stopped");
}

/// Handle for a registered listener. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}

#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<Inner>,
}

impl ChangeNotifier {
    /// Creates the notifier and spawns its flush task on `runtime`.
    pub fn spawn(window: Duration, runtime: &Handle) -> Self {
        let (wake, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            pending: DashMap::new(),
            delivered: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            wake,
        });
        runtime.spawn(flush_loop(Arc::downgrade(&inner), window, rx));
        Self { inner }
    }

    /// Queue `snapshot` for delivery. Older revisions than what is already
    /// queued or delivered for the same key are dropped.
    pub fn publish(&self, snapshot: TransferRecord) {
        let key = snapshot.key;
        if let Some(seen) = self.inner.delivered.get(&key) {
            if *seen >= snapshot.revision {
                return;
            }
        }

        match self.inner.pending.entry(key) {
            Entry::Occupied(mut queued) => {
                if queued.get().revision < snapshot.revision {
                    queued.insert(snapshot);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
                if self.inner.wake.send(key).is_err() {
                    tracing::warn!(%key, "Change notifier is not running, update dropped");
                }
            }
        }
    }

    /// Register a listener. It runs on the notifier task, so it should be
    /// quick and must not block.
    pub fn subscribe(&self, on_changed: impl Fn(&TransferRecord) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let mut guard = match self.inner.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Listener list lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.push((id, Arc::new(on_changed)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Forget a removed session's queued and delivered state.
    pub fn forget(&self, key: SessionKey) {
        self.inner.pending.remove(&key);
        self.inner.delivered.remove(&key);
    }
}

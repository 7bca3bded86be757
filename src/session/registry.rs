//! Authoritative map from session key to transfer record.
//!
//! Every record sits behind its own mutex so unrelated sessions never
//! contend. The DashMap shard lock is only held long enough to clone the
//! record's `Arc`, never while a record is locked.

use crate::common::{EngineError, SessionKey, TransferRecord, TransferStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Whether a mutation may open a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// Only mutate a record that already exists.
    Existing,
    /// Create the record first if this is the first event for the key.
    OrCreate,
}

struct Slot {
    record: TransferRecord,
    // Set under the lock by `remove` so holders of a stale Arc can tell.
    removed: bool,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Session record lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    records: DashMap<SessionKey, SharedSlot>,
    revision: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn slot(&self, key: SessionKey, attach: Attach) -> Option<SharedSlot> {
        match attach {
            Attach::Existing => self.records.get(&key).map(|entry| entry.value().clone()),
            Attach::OrCreate => Some(
                self.records
                    .entry(key)
                    .or_insert_with(|| {
                        tracing::debug!(%key, "Opening session record");
                        Arc::new(Mutex::new(Slot {
                            record: TransferRecord::new(key),
                            removed: false,
                        }))
                    })
                    .value()
                    .clone(),
            ),
        }
    }

    /// Returns a snapshot of the record for `key`, creating it if needed.
    pub fn get_or_create(&self, key: SessionKey) -> TransferRecord {
        loop {
            if let Some(slot) = self.slot(key, Attach::OrCreate) {
                let guard = lock_slot(&slot);
                if !guard.removed {
                    return guard.record.clone();
                }
            }
        }
    }

    /// Applies `f` to the record under exclusive access.
    ///
    /// Returns the post-mutation snapshot together with whatever `f`
    /// returned. With `Attach::Existing` an unknown key fails with
    /// `UnknownSession`.
    pub fn mutate<R>(
        &self,
        key: SessionKey,
        attach: Attach,
        f: impl FnOnce(&mut TransferRecord) -> R,
    ) -> Result<(TransferRecord, R), EngineError> {
        self.apply(key, attach, |record| (f(record), true))
    }

    /// Like `mutate`, but `f` returns `None` when it left the record
    /// untouched, in which case the revision is not bumped.
    pub fn mutate_if<R>(
        &self,
        key: SessionKey,
        attach: Attach,
        f: impl FnOnce(&mut TransferRecord) -> Option<R>,
    ) -> Result<(TransferRecord, Option<R>), EngineError> {
        self.apply(key, attach, |record| {
            let outcome = f(record);
            let changed = outcome.is_some();
            (outcome, changed)
        })
    }

    fn apply<R>(
        &self,
        key: SessionKey,
        attach: Attach,
        f: impl FnOnce(&mut TransferRecord) -> (R, bool),
    ) -> Result<(TransferRecord, R), EngineError> {
        loop {
            let slot = self
                .slot(key, attach)
                .ok_or(EngineError::UnknownSession(key))?;
            let mut guard = lock_slot(&slot);
            if guard.removed {
                // Lost a race with `remove`; a creating caller starts fresh.
                match attach {
                    Attach::Existing => return Err(EngineError::UnknownSession(key)),
                    Attach::OrCreate => continue,
                }
            }

            let fresh = guard.record.revision == 0;
            let (outcome, changed) = f(&mut guard.record);
            if changed || fresh {
                guard.record.revision = self.next_revision();
            }
            return Ok((guard.record.clone(), outcome));
        }
    }

    /// Snapshot of one record, if it exists.
    pub fn get(&self, key: SessionKey) -> Option<TransferRecord> {
        let slot = self.slot(key, Attach::Existing)?;
        let guard = lock_slot(&slot);
        (!guard.removed).then(|| guard.record.clone())
    }

    /// Deletes the record. Callers remove a record only after its
    /// side-effect tasks have run.
    pub fn remove(&self, key: SessionKey) -> Option<TransferRecord> {
        let slot = self.slot(key, Attach::Existing)?;
        let mut guard = lock_slot(&slot);
        if guard.removed {
            return None;
        }
        guard.removed = true;
        self.records
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        tracing::debug!(%key, "Removed session record");
        Some(guard.record.clone())
    }

    /// All records, most recently updated first.
    pub fn snapshot_all(&self) -> Vec<TransferRecord> {
        // Collect the Arcs first so no shard lock is held while locking records.
        let slots: Vec<SharedSlot> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut snapshots: Vec<TransferRecord> = slots
            .iter()
            .filter_map(|slot| {
                let guard = lock_slot(slot);
                (!guard.removed).then(|| guard.record.clone())
            })
            .collect();
        snapshots.sort_by(|a, b| b.revision.cmp(&a.revision));
        snapshots
    }

    /// Records with the given status, most recently updated first.
    pub fn list_by_status(&self, status: TransferStatus) -> Vec<TransferRecord> {
        self.snapshot_all()
            .into_iter()
            .filter(|record| record.status == status)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(raw: u64) -> SessionKey {
        SessionKey::new(raw)
    }

    #[test]
    fn creation_is_idempotent() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create(key(1));
        let second = registry.get_or_create(key(1));
        assert_eq!(first.key, second.key);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mutate_existing_fails_for_unknown_key() {
        let registry = SessionRegistry::new();
        let err = registry
            .mutate(key(9), Attach::Existing, |_| ())
            .expect_err("no record yet");
        assert!(matches!(err, EngineError::UnknownSession(k) if k == key(9)));
        assert!(registry.is_empty());
    }

    #[test]
    fn mutate_returns_a_detached_snapshot() {
        let registry = SessionRegistry::new();
        let (mut snapshot, _) = registry
            .mutate(key(1), Attach::OrCreate, |record| {
                record.display_name = "a.txt".into();
            })
            .unwrap();
        snapshot.display_name = "changed".into();

        assert_eq!(registry.get(key(1)).unwrap().display_name, "a.txt");
    }

    #[test]
    fn snapshot_all_orders_most_recent_first() {
        let registry = SessionRegistry::new();
        for raw in [1, 2, 3] {
            registry.mutate(key(raw), Attach::OrCreate, |_| ()).unwrap();
        }
        registry.mutate(key(1), Attach::Existing, |_| ()).unwrap();

        let order: Vec<u64> = registry
            .snapshot_all()
            .iter()
            .map(|r| r.key.get())
            .collect();
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn untouched_records_keep_their_revision() {
        let registry = SessionRegistry::new();
        let (created, _) = registry
            .mutate_if(key(1), Attach::OrCreate, |_| None::<()>)
            .unwrap();
        assert!(created.revision > 0);

        let (same, outcome) = registry
            .mutate_if(key(1), Attach::Existing, |_| None::<()>)
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(same.revision, created.revision);

        let (bumped, outcome) = registry
            .mutate_if(key(1), Attach::Existing, |r| {
                r.bytes_sent = 1;
                Some(())
            })
            .unwrap();
        assert_eq!(outcome, Some(()));
        assert!(bumped.revision > created.revision);
    }

    #[test]
    fn removed_records_reject_further_attach() {
        let registry = SessionRegistry::new();
        registry.get_or_create(key(5));
        assert!(registry.remove(key(5)).is_some());
        assert!(registry.remove(key(5)).is_none());
        assert!(registry.get(key(5)).is_none());
        assert!(registry.mutate(key(5), Attach::Existing, |_| ()).is_err());
    }

    #[test]
    fn list_by_status_filters() {
        let registry = SessionRegistry::new();
        registry
            .mutate(key(1), Attach::OrCreate, |r| {
                r.transition(TransferStatus::InProgress);
            })
            .unwrap();
        registry.get_or_create(key(2));

        let in_progress = registry.list_by_status(TransferStatus::InProgress);
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].key, key(1));
        assert_eq!(registry.list_by_status(TransferStatus::Pending).len(), 1);
    }

    #[test]
    fn concurrent_mutations_are_not_lost() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        registry
                            .mutate(key(42), Attach::OrCreate, |r| r.bytes_sent += 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get(key(42)).unwrap().bytes_sent, 2_000);
    }
}

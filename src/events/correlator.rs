//! Folds raw transport events into session records.
//!
//! Events may arrive duplicated and out of order across threads, so status
//! and percentage are merged monotonically: terminal statuses dominate,
//! higher percentages win, and a terminal record ignores further progress.

use crate::common::{
    percentage_of, Direction, EngineError, SessionKey, TransferRecord, TransferStatus,
};
use crate::events::TransportEvent;
use crate::notify::ChangeNotifier;
use crate::session::{Attach, PathDeduper, SessionRegistry};
use crate::transfer::{FinalizeJob, Finalizer};
use std::path::Path;
use std::sync::Arc;

/// Fallback shown when the transport reports an error with no text.
const GENERIC_ERROR: &str = "transfer failed";

/// Follow-up work for a mutation that changed the record.
#[derive(Default)]
struct Effect {
    finalize: Option<FinalizeJob>,
}

impl Effect {
    fn changed() -> Option<Self> {
        Some(Self::default())
    }
}

/// Moves a live record into `status` and claims its side effects.
/// Returns `None` if the record was already terminal.
fn settle_into(record: &mut TransferRecord, status: TransferStatus) -> Option<Effect> {
    if !record.transition(status) {
        return None;
    }
    tracing::info!(key = %record.key, status = %status, "Session reached terminal status");
    let finalize = record
        .claim_finalize()
        .then(|| FinalizeJob::from_record(record));
    Some(Effect { finalize })
}

/// A settled record receiving another terminal event. Duplicates are
/// silent; an opposing outcome loses to the one already recorded.
fn ignore_late(record: &TransferRecord, incoming: TransferStatus) -> Option<Effect> {
    if record.status != incoming {
        let race = EngineError::CancelRace {
            key: record.key,
            kept: record.status,
        };
        tracing::info!(key = %record.key, incoming = %incoming, "{race}");
    }
    None
}

fn file_name_of(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Path::new(trimmed)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .or_else(|| Some(trimmed.to_string()))
}

#[derive(Clone)]
pub struct EventCorrelator {
    registry: Arc<SessionRegistry>,
    paths: PathDeduper,
    notifier: ChangeNotifier,
    finalizer: Finalizer,
}

impl EventCorrelator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        paths: PathDeduper,
        notifier: ChangeNotifier,
        finalizer: Finalizer,
    ) -> Self {
        Self {
            registry,
            paths,
            notifier,
            finalizer,
        }
    }

    /// Applies `event` and logs anything that could not be applied.
    /// Never fails: unknown sessions are dropped.
    pub fn handle(&self, event: TransportEvent) -> Option<TransferRecord> {
        let key = event.key();
        let kind = event.kind();
        match self.apply(event) {
            Ok(snapshot) => Some(snapshot),
            Err(EngineError::UnknownSession(_)) => {
                tracing::warn!(%key, kind, "Dropping event for unknown session");
                None
            }
            Err(e) => {
                tracing::warn!(%key, kind, error = %e, "Failed to apply transport event");
                None
            }
        }
    }

    /// Applies `event`, returning the record as it stands afterwards.
    pub fn apply(&self, event: TransportEvent) -> Result<TransferRecord, EngineError> {
        tracing::debug!(
            key = %event.key(),
            kind = event.kind(),
            peer = ?event.peer().device_name,
            "Transport event"
        );
        let attach = if event.opens_session() {
            Attach::OrCreate
        } else {
            Attach::Existing
        };
        match event {
            TransportEvent::SessionOpened {
                key,
                peer,
                direction,
                display_name,
                file_name,
                file_size,
                total_file_count,
                awaiting_confirmation,
            } => self.commit(key, attach, |record| {
                let fresh = record.revision == 0;
                if fresh {
                    record.direction = direction;
                    tracing::info!(%key, ?direction, awaiting_confirmation, "Session opened");
                }
                if record.is_terminal() {
                    return None;
                }
                record.peer.merge(&peer);

                let name = display_name.trim();
                if !name.is_empty() {
                    record.display_name = name.to_string();
                }
                if let Some(first) = file_name_of(&file_name) {
                    if record.display_name.is_empty() {
                        record.display_name = first.clone();
                    }
                    if record.current_file_name.is_none() {
                        record.current_file_name = Some(first);
                        record.file_size = file_size;
                    }
                }
                record.total_file_count = record.total_file_count.max(total_file_count);
                if !awaiting_confirmation {
                    record.transition(TransferStatus::InProgress);
                }
                Effect::changed()
            }),

            TransportEvent::ProgressUpdate {
                key,
                peer,
                bytes_sent,
                bytes_total,
                sent_file_count,
                total_file_count,
                current_file_name,
                file_size,
                percentage,
            } => self.commit(key, attach, |record| {
                if record.is_terminal() {
                    tracing::debug!(%key, status = %record.status, "Ignoring progress for settled session");
                    return None;
                }
                record.peer.merge(&peer);
                record.transition(TransferStatus::InProgress);

                record.bytes_sent = record.bytes_sent.max(bytes_sent);
                record.bytes_total = record.bytes_total.max(bytes_total);
                record.sent_file_count = record.sent_file_count.max(sent_file_count);
                record.total_file_count = record.total_file_count.max(total_file_count);

                if let Some((path, _)) = self.paths.insert_into(record, &current_file_name) {
                    let name = file_name_of(&current_file_name);
                    if record.display_name.is_empty() {
                        record.display_name = name.clone().unwrap_or_default();
                    }
                    record.current_file_name = name;
                    record.file_path = Some(path);
                    record.file_size = file_size;
                }

                let pct = if record.bytes_total > 0 {
                    percentage_of(record.bytes_sent, record.bytes_total)
                } else {
                    percentage.unwrap_or(100)
                };
                record.raise_percentage(pct);

                if record.percentage >= 100 {
                    if record.total_file_count > 0 {
                        record.sent_file_count = record.sent_file_count.max(record.total_file_count);
                    }
                    return settle_into(record, TransferStatus::Completed).or_else(Effect::changed);
                }
                Effect::changed()
            }),

            TransportEvent::Completed { key, peer, summary } => {
                self.commit(key, attach, |record| {
                    record.peer.merge(&peer);
                    if record.is_terminal() {
                        return ignore_late(record, TransferStatus::Completed);
                    }
                    if !summary.trim().is_empty() {
                        tracing::info!(%key, summary = summary.trim(), "Transport reported completion");
                    }
                    record.raise_percentage(100);
                    if record.total_file_count > 0 {
                        record.sent_file_count = record.sent_file_count.max(record.total_file_count);
                    }
                    settle_into(record, TransferStatus::Completed)
                })
            }

            TransportEvent::Errored { key, peer, message } => {
                self.commit(key, attach, |record| {
                    record.peer.merge(&peer);
                    if record.is_terminal() {
                        return ignore_late(record, TransferStatus::Error);
                    }
                    let message = message.trim();
                    let message = if message.is_empty() { GENERIC_ERROR } else { message };
                    let err = EngineError::TransportError {
                        key,
                        message: message.to_string(),
                    };
                    tracing::warn!(%key, error = %err, "Session failed");
                    record.error_message = Some(message.to_string());
                    settle_into(record, TransferStatus::Error)
                })
            }

            TransportEvent::CancelAcked { key, peer } => {
                self.commit(key, attach, |record| {
                    record.peer.merge(&peer);
                    if record.is_terminal() {
                        return ignore_late(record, TransferStatus::Canceled);
                    }
                    settle_into(record, TransferStatus::Canceled)
                })
            }
        }
    }

    /// Optimistic local cancel. A no-op for records that already settled.
    ///
    /// The flag is true only when this call moved the record to `Canceled`.
    pub fn mark_canceled_locally(
        &self,
        key: SessionKey,
    ) -> Result<(TransferRecord, bool), EngineError> {
        self.commit_changed(key, Attach::Existing, |record| {
            if record.is_terminal() {
                tracing::debug!(%key, status = %record.status, "Cancel requested for settled session");
                return None;
            }
            tracing::info!(%key, "Cancel requested locally");
            settle_into(record, TransferStatus::Canceled)
        })
    }

    /// The user accepted a pending inbound offer.
    pub fn accept_offer(&self, key: SessionKey) -> Result<TransferRecord, EngineError> {
        self.commit(key, Attach::Existing, |record| {
            (record.status == TransferStatus::Pending && record.direction == Direction::Inbound)
                .then(|| {
                    record.transition(TransferStatus::InProgress);
                    tracing::info!(%key, "Offer accepted");
                    Effect::default()
                })
        })
    }

    /// The user rejected an offer: the record is canceled and whatever was
    /// already staged gets discarded.
    pub fn reject_offer(&self, key: SessionKey) -> Result<TransferRecord, EngineError> {
        self.commit(key, Attach::Existing, |record| {
            if record.is_terminal() {
                return None;
            }
            tracing::info!(%key, "Offer rejected");
            settle_into(record, TransferStatus::Canceled)
        })
    }

    /// Runs one record mutation, then publishes and schedules outside the
    /// record lock.
    fn commit(
        &self,
        key: SessionKey,
        attach: Attach,
        f: impl FnOnce(&mut TransferRecord) -> Option<Effect>,
    ) -> Result<TransferRecord, EngineError> {
        self.commit_changed(key, attach, f).map(|(snapshot, _)| snapshot)
    }

    /// Like `commit`, also reporting whether the mutation changed anything.
    fn commit_changed(
        &self,
        key: SessionKey,
        attach: Attach,
        f: impl FnOnce(&mut TransferRecord) -> Option<Effect>,
    ) -> Result<(TransferRecord, bool), EngineError> {
        let (snapshot, effect) = self.registry.mutate_if(key, attach, f)?;
        let Some(effect) = effect else {
            return Ok((snapshot, false));
        };

        self.notifier.publish(snapshot.clone());
        if let Some(job) = effect.finalize {
            self.finalizer.schedule(job);
        }
        Ok((snapshot, true))
    }
}

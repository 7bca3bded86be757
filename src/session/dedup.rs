//! Per-session ordered set of reported file paths.

use crate::common::{Direction, EngineError, SessionKey, TransferRecord};
use crate::session::registry::{Attach, SessionRegistry};
use crate::session::staging::StagingRefs;
use crate::utils::paths::{normalize_reported_path, staging_root};
use std::path::PathBuf;
use std::sync::Arc;

/// Records each physical file of a session once, in first-seen order.
///
/// Paths live inside the owning `TransferRecord`, so they are always read
/// and written under that record's lock.
#[derive(Clone)]
pub struct PathDeduper {
    registry: Arc<SessionRegistry>,
    staging: Arc<StagingRefs>,
    staging_dir: PathBuf,
}

impl PathDeduper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        staging: Arc<StagingRefs>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            staging,
            staging_dir: staging_dir.into(),
        }
    }

    /// Adds `raw` to the session's unique set. Blank names are a no-op.
    /// Returns true if the path was new.
    pub fn add(&self, key: SessionKey, raw: &str) -> Result<bool, EngineError> {
        self.registry
            .mutate(key, Attach::Existing, |record| self.insert_into(record, raw))
            .map(|(_, tracked)| tracked.is_some_and(|(_, added)| added))
    }

    /// Current unique list, in insertion order. Does not clear it.
    pub fn drain(&self, key: SessionKey) -> Result<Vec<PathBuf>, EngineError> {
        self.registry
            .get(key)
            .map(|record| record.unique_paths.to_vec())
            .ok_or(EngineError::UnknownSession(key))
    }

    /// Inserts into a record the caller already holds exclusively.
    /// Returns the normalized path and whether it was new, or `None` if
    /// `raw` is not a usable path.
    pub(crate) fn insert_into(&self, record: &mut TransferRecord, raw: &str) -> Option<(PathBuf, bool)> {
        let path = match normalize_reported_path(&self.staging_dir, raw) {
            Ok(path) => path,
            Err(err) => {
                if !raw.trim().is_empty() {
                    tracing::warn!(key = %record.key, name = raw, error = %err, "Ignoring reported path");
                }
                return None;
            }
        };

        if !record.unique_paths.insert(path.clone()) {
            return Some((path, false));
        }

        if record.direction == Direction::Inbound {
            if let Some(root) = staging_root(&self.staging_dir, &path) {
                if !record.staging_roots.contains(&root) {
                    let users = self.staging.acquire(&root);
                    tracing::debug!(key = %record.key, root = %root.display(), users, "Staging root in use");
                    record.staging_roots.push(root);
                }
            }
        }

        tracing::debug!(key = %record.key, path = %path.display(), "Tracked session path");
        Some((path, true))
    }
}

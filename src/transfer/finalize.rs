//! Terminal side-effect sequence: relocate or discard staged files, release
//! staging roots, then publish the settled record.
//!
//! Runs detached on the runtime, after the record lock is released, against
//! a private copy of the record's path list.

use crate::common::config::RelocationSettings;
use crate::common::{Direction, EngineError, SessionKey, TransferRecord, TransferStatus};
use crate::notify::ChangeNotifier;
use crate::session::{Attach, SessionRegistry, StagingRefs};
use crate::transfer::storage::{discard_staged, prune_empty_dirs, relocate_file};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// What happens to a terminal session's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Move staged files to the download directory.
    Relocate,
    /// Delete staged files.
    Discard,
    /// Leave staged files for manual recovery.
    Keep,
    /// Not ours to touch.
    Skip,
}

impl Disposition {
    pub fn for_record(record: &TransferRecord) -> Self {
        if record.direction == Direction::Outbound {
            return Disposition::Skip;
        }
        match record.status {
            TransferStatus::Completed => Disposition::Relocate,
            TransferStatus::Canceled => Disposition::Discard,
            _ => Disposition::Keep,
        }
    }
}

/// Private copy of everything the side-effect task needs.
#[derive(Debug, Clone)]
pub struct FinalizeJob {
    pub key: SessionKey,
    pub disposition: Disposition,
    pub paths: Vec<PathBuf>,
    pub staging_roots: Vec<PathBuf>,
}

impl FinalizeJob {
    pub fn from_record(record: &TransferRecord) -> Self {
        Self {
            key: record.key,
            disposition: Disposition::for_record(record),
            paths: record.unique_paths.to_vec(),
            staging_roots: record.staging_roots.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Outcome {
    relocated: Vec<PathBuf>,
    failed: usize,
}

struct FinalizerInner {
    registry: Arc<SessionRegistry>,
    staging: Arc<StagingRefs>,
    notifier: ChangeNotifier,
    staging_dir: PathBuf,
    download_dir: PathBuf,
    relocation: RelocationSettings,
    tasks: TaskTracker,
    runtime: Handle,
}

#[derive(Clone)]
pub struct Finalizer {
    inner: Arc<FinalizerInner>,
}

impl Finalizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SessionRegistry>,
        staging: Arc<StagingRefs>,
        notifier: ChangeNotifier,
        staging_dir: PathBuf,
        download_dir: PathBuf,
        relocation: RelocationSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(FinalizerInner {
                registry,
                staging,
                notifier,
                staging_dir,
                download_dir,
                relocation,
                tasks: TaskTracker::new(),
                runtime,
            }),
        }
    }

    /// Spawns the side-effect task. Callable from any thread.
    pub fn schedule(&self, job: FinalizeJob) {
        tracing::debug!(
            key = %job.key,
            disposition = ?job.disposition,
            files = job.paths.len(),
            "Scheduling terminal side effects"
        );
        let inner = self.inner.clone();
        self.inner.tasks.spawn_on(run(inner, job), &self.inner.runtime);
    }

    /// Waits until every side-effect task scheduled so far has finished.
    pub async fn settle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }
}

async fn relocate_with_retry(
    inner: &FinalizerInner,
    key: SessionKey,
    source: &Path,
) -> Result<PathBuf, EngineError> {
    let attempts = inner.relocation.attempts.max(1);
    let mut attempt = 1;
    loop {
        match relocate_file(source, &inner.staging_dir, &inner.download_dir).await {
            Ok(dest) => return Ok(dest),
            Err(e) if attempt < attempts => {
                tracing::debug!(%key, attempt, error = %e, "Relocation attempt failed, retrying");
                tokio::time::sleep(inner.relocation.retry_delay()).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn apply_disposition(inner: &FinalizerInner, job: &FinalizeJob) -> Outcome {
    let mut outcome = Outcome::default();
    match job.disposition {
        Disposition::Relocate => {
            for source in &job.paths {
                match relocate_with_retry(inner, job.key, source).await {
                    Ok(dest) => {
                        tracing::info!(
                            key = %job.key,
                            from = %source.display(),
                            to = %dest.display(),
                            "Relocated file"
                        );
                        outcome.relocated.push(dest);
                    }
                    Err(e) => {
                        tracing::warn!(key = %job.key, error = %e, "Relocation failed, staging copy kept");
                        outcome.failed += 1;
                    }
                }
            }
        }
        Disposition::Discard => {
            for source in &job.paths {
                if let Err(e) = discard_staged(source, &inner.staging_dir).await {
                    tracing::warn!(key = %job.key, error = %e, "Failed to discard staged file");
                }
            }
        }
        Disposition::Keep => {
            if !job.paths.is_empty() {
                tracing::info!(
                    key = %job.key,
                    files = job.paths.len(),
                    "Keeping staged files for manual recovery"
                );
            }
        }
        Disposition::Skip => {}
    }
    outcome
}

fn display_path(download_dir: &Path, staging_dir: &Path, job: &FinalizeJob, relocated: &[PathBuf]) -> PathBuf {
    if let [single] = relocated {
        return single.clone();
    }
    match job.staging_roots.as_slice() {
        [root] => match root.strip_prefix(staging_dir) {
            Ok(relative) => download_dir.join(relative),
            Err(_) => download_dir.to_path_buf(),
        },
        _ => download_dir.to_path_buf(),
    }
}

async fn run(inner: Arc<FinalizerInner>, job: FinalizeJob) {
    let outcome = apply_disposition(&inner, &job).await;

    for root in &job.staging_roots {
        if inner.staging.release(root) == 0 {
            prune_empty_dirs(root, &job.paths).await;
        } else {
            tracing::debug!(key = %job.key, root = %root.display(), "Staging root still shared, not pruning");
        }
    }

    let total = job.paths.len();
    let delivered = outcome.relocated.len();
    let resolved = (job.disposition == Disposition::Relocate && delivered > 0)
        .then(|| display_path(&inner.download_dir, &inner.staging_dir, &job, &outcome.relocated));

    let settled = inner.registry.mutate(job.key, Attach::Existing, |record| {
        if job.disposition == Disposition::Relocate {
            record.relocated_paths = outcome.relocated.clone();
            if let Some(path) = &resolved {
                record.resolved_display_path = Some(path.clone());
            }
            if total > 0 && delivered == 0 {
                record.fail_delivery(format!("none of {total} received files could be saved"));
            }
        }
        record.settled = true;
    });

    match settled {
        Ok((snapshot, ())) => {
            if outcome.failed > 0 {
                tracing::warn!(
                    key = %job.key,
                    delivered,
                    failed = outcome.failed,
                    status = %snapshot.status,
                    "Session settled with files left in staging"
                );
            } else {
                tracing::info!(key = %job.key, status = %snapshot.status, "Session settled");
            }
            inner.notifier.publish(snapshot);
        }
        Err(e) => tracing::debug!(key = %job.key, error = %e, "Session removed before it settled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        staging: TempDir,
        downloads: TempDir,
        registry: Arc<SessionRegistry>,
        refs: Arc<StagingRefs>,
        finalizer: Finalizer,
    }

    fn fixture() -> Fixture {
        let staging = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let refs = Arc::new(StagingRefs::new());
        let notifier = ChangeNotifier::spawn(Duration::ZERO, &Handle::current());
        let finalizer = Finalizer::new(
            registry.clone(),
            refs.clone(),
            notifier,
            staging.path().to_path_buf(),
            downloads.path().to_path_buf(),
            RelocationSettings {
                attempts: 1,
                retry_delay_ms: 0,
            },
            Handle::current(),
        );
        Fixture {
            staging,
            downloads,
            registry,
            refs,
            finalizer,
        }
    }

    fn terminal(fx: &Fixture, key: u64, status: TransferStatus, paths: &[PathBuf]) -> TransferRecord {
        let (record, _) = fx
            .registry
            .mutate(SessionKey::new(key), Attach::OrCreate, |r| {
                for path in paths {
                    r.unique_paths.insert(path.clone());
                }
                r.transition(status);
            })
            .unwrap();
        record
    }

    #[test]
    fn disposition_follows_status_and_direction() {
        let mut record = TransferRecord::new(SessionKey::new(1));
        record.status = TransferStatus::Completed;
        assert_eq!(Disposition::for_record(&record), Disposition::Relocate);
        record.status = TransferStatus::Canceled;
        assert_eq!(Disposition::for_record(&record), Disposition::Discard);
        record.status = TransferStatus::Error;
        assert_eq!(Disposition::for_record(&record), Disposition::Keep);
        record.direction = Direction::Outbound;
        record.status = TransferStatus::Completed;
        assert_eq!(Disposition::for_record(&record), Disposition::Skip);
    }

    #[tokio::test]
    async fn completed_session_relocates_and_settles() {
        let fx = fixture();
        let source = fx.staging.path().join("a.txt");
        tokio::fs::write(&source, b"hello").await.unwrap();
        let record = terminal(&fx, 1, TransferStatus::Completed, &[source.clone()]);

        fx.finalizer.schedule(FinalizeJob::from_record(&record));
        fx.finalizer.settle().await;

        let settled = fx.registry.get(SessionKey::new(1)).unwrap();
        let dest = fx.downloads.path().join("a.txt");
        assert!(settled.settled);
        assert_eq!(settled.relocated_paths, vec![dest.clone()]);
        assert_eq!(settled.resolved_display_path, Some(dest.clone()));
        assert!(dest.exists());
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn nothing_delivered_turns_completion_into_error() {
        let fx = fixture();
        let missing = fx.staging.path().join("gone.bin");
        let record = terminal(&fx, 2, TransferStatus::Completed, &[missing]);

        fx.finalizer.schedule(FinalizeJob::from_record(&record));
        fx.finalizer.settle().await;

        let settled = fx.registry.get(SessionKey::new(2)).unwrap();
        assert_eq!(settled.status, TransferStatus::Error);
        assert!(settled.error_message.is_some());
        assert!(settled.relocated_paths.is_empty());
    }

    #[tokio::test]
    async fn canceled_session_discards_and_prunes_its_root() {
        let fx = fixture();
        let root = fx.staging.path().join("album");
        let source = root.join("a.jpg");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(&source, b"x").await.unwrap();
        fx.refs.acquire(&root);

        let mut record = terminal(&fx, 3, TransferStatus::Canceled, &[source.clone()]);
        record.staging_roots = vec![root.clone()];

        fx.finalizer.schedule(FinalizeJob::from_record(&record));
        fx.finalizer.settle().await;

        assert!(!source.exists());
        assert!(!root.exists());
        assert_eq!(fx.refs.count(&root), 0);
        assert!(fx.downloads.path().read_dir().unwrap().next().is_none());
    }

    #[tokio::test]
    async fn shared_root_survives_until_last_user_releases() {
        let fx = fixture();
        let root = fx.staging.path().join("shared");
        let mine = root.join("mine.bin");
        let sibling = root.join("sibling.bin");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(&mine, b"1").await.unwrap();
        tokio::fs::write(&sibling, b"2").await.unwrap();
        fx.refs.acquire(&root);
        fx.refs.acquire(&root);

        let mut record = terminal(&fx, 4, TransferStatus::Completed, &[mine]);
        record.staging_roots = vec![root.clone()];
        fx.finalizer.schedule(FinalizeJob::from_record(&record));
        fx.finalizer.settle().await;

        assert!(root.exists());
        assert!(sibling.exists());
        assert_eq!(fx.refs.count(&root), 1);
    }

    #[tokio::test]
    async fn errored_session_keeps_staged_files() {
        let fx = fixture();
        let source = fx.staging.path().join("partial.bin");
        tokio::fs::write(&source, b"half").await.unwrap();
        let record = terminal(&fx, 5, TransferStatus::Error, &[source.clone()]);

        fx.finalizer.schedule(FinalizeJob::from_record(&record));
        fx.finalizer.settle().await;

        assert!(source.exists());
        assert!(fx.registry.get(SessionKey::new(5)).unwrap().settled);
    }
}

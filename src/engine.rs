//! The presentation-facing engine: wires registry, correlator, finalizer,
//! notifier and command facade together.

use crate::commands::{SessionCommandFacade, TransportCommands};
use crate::common::{Direction, EngineConfig, EngineError, PeerInfo, SessionKey, TransferRecord, TransferStatus};
use crate::events::{EventCorrelator, TransportCallbacks, TransportEvent};
use crate::notify::{ChangeNotifier, Subscription};
use crate::session::{PathDeduper, SessionRegistry, StagingRefs};
use crate::transfer::storage::{prune_empty_dirs, remove_files};
use crate::transfer::Finalizer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    registry: Arc<SessionRegistry>,
    staging: Arc<StagingRefs>,
    paths: PathDeduper,
    notifier: ChangeNotifier,
    finalizer: Finalizer,
    correlator: EventCorrelator,
    commands: SessionCommandFacade,
}

impl Engine {
    /// Builds an engine on the current Tokio runtime.
    pub fn new(config: EngineConfig, transport: Arc<dyn TransportCommands>) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        Ok(Self::with_runtime(config, transport, runtime))
    }

    /// Builds an engine whose background tasks run on `runtime`.
    pub fn with_runtime(config: EngineConfig, transport: Arc<dyn TransportCommands>, runtime: Handle) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let staging = Arc::new(StagingRefs::new());
        let notifier = ChangeNotifier::spawn(config.notifier.window(), &runtime);
        let paths = PathDeduper::new(registry.clone(), staging.clone(), config.staging_dir.clone());
        let finalizer = Finalizer::new(
            registry.clone(),
            staging.clone(),
            notifier.clone(),
            config.staging_dir.clone(),
            config.download_dir.clone(),
            config.relocation,
            runtime,
        );
        let correlator = EventCorrelator::new(
            registry.clone(),
            paths.clone(),
            notifier.clone(),
            finalizer.clone(),
        );
        let commands = SessionCommandFacade::new(correlator.clone(), transport);

        tracing::debug!(
            staging = %config.staging_dir.display(),
            downloads = %config.download_dir.display(),
            "Session engine ready"
        );

        Self {
            config: Arc::new(config),
            registry,
            staging,
            paths,
            notifier,
            finalizer,
            correlator,
            commands,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feeds one transport event. Unknown sessions are logged and dropped.
    pub fn handle_event(&self, event: TransportEvent) -> Option<TransferRecord> {
        self.correlator.handle(event)
    }

    /// Callback object to hand to the transport.
    pub fn callbacks(&self) -> Arc<dyn TransportCallbacks> {
        Arc::new(self.clone())
    }

    pub fn subscribe(&self, on_changed: impl Fn(&TransferRecord) + Send + Sync + 'static) -> Subscription {
        self.notifier.subscribe(on_changed)
    }

    /// Records with `status`, most recently updated first.
    pub fn list_by_status(&self, status: TransferStatus) -> Vec<TransferRecord> {
        self.registry.list_by_status(status)
    }

    /// Every record, most recently updated first.
    pub fn snapshot_all(&self) -> Vec<TransferRecord> {
        self.registry.snapshot_all()
    }

    pub fn get(&self, key: SessionKey) -> Option<TransferRecord> {
        self.registry.get(key)
    }

    /// Distinct files reported for the session, in first-seen order.
    pub fn unique_paths(&self, key: SessionKey) -> Result<Vec<PathBuf>, EngineError> {
        self.paths.drain(key)
    }

    pub fn send_files(&self, peer: &PeerInfo, paths: &[PathBuf]) {
        self.commands.send_files(peer, paths)
    }

    pub fn request_cancel(&self, key: SessionKey) -> Result<TransferRecord, EngineError> {
        self.commands.request_cancel(key)
    }

    pub fn confirm_incoming(&self, key: SessionKey, accept: bool) -> Option<TransferRecord> {
        self.commands.confirm_incoming(key, accept)
    }

    /// Removes a settled record together with the files it left behind:
    /// delivered files for completed inbound sessions, leftover staging
    /// copies for other inbound sessions. Outbound files are never touched.
    pub async fn request_delete(&self, key: SessionKey) -> Result<TransferRecord, EngineError> {
        let record = self.registry.get(key).ok_or(EngineError::UnknownSession(key))?;
        if !record.is_terminal() {
            return Err(EngineError::NotTerminal(key));
        }
        if !record.settled {
            return Err(EngineError::SideEffectsPending(key));
        }

        let record = self.registry.remove(key).ok_or(EngineError::UnknownSession(key))?;
        self.notifier.forget(key);

        let artifacts = match (record.direction, record.status) {
            (Direction::Outbound, _) => Vec::new(),
            (Direction::Inbound, TransferStatus::Completed) => record.relocated_paths.clone(),
            (Direction::Inbound, _) => record.unique_paths.to_vec(),
        };
        let removed = remove_files(&artifacts).await;

        if record.direction == Direction::Inbound && record.status != TransferStatus::Completed {
            for root in &record.staging_roots {
                if self.staging.count(root) == 0 {
                    prune_empty_dirs(root, &artifacts).await;
                }
            }
        }

        tracing::info!(%key, removed, status = %record.status, "Deleted session");
        Ok(record)
    }

    /// Waits for every scheduled terminal side effect to finish.
    pub async fn settle(&self) {
        self.finalizer.settle().await
    }
}

impl TransportCallbacks for Engine {
    fn deliver(&self, event: TransportEvent) {
        self.correlator.handle(event);
    }
}

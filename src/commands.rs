//! Presentation-originated actions and the outbound transport seam.

use crate::common::{EngineError, PeerInfo, SessionKey, TransferRecord};
use crate::events::EventCorrelator;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Commands the engine sends to the native transport.
///
/// All of them are fire-and-forget: the outcome comes back through
/// `TransportCallbacks`, never through the return value. An `Err` only means
/// the command could not be handed over.
pub trait TransportCommands: Send + Sync {
    fn send_files(&self, peer: &PeerInfo, paths: &[PathBuf]) -> Result<()>;
    fn cancel(&self, key: SessionKey) -> Result<()>;
    fn confirm_incoming(&self, key: SessionKey, accept: bool) -> Result<()>;
}

/// Owned form of a `TransportCommands` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TransportCommand {
    SendFiles { peer: PeerInfo, paths: Vec<PathBuf> },
    Cancel { key: SessionKey },
    ConfirmIncoming { key: SessionKey, accept: bool },
}

/// Hands commands to a bridge task over an unbounded channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, command: TransportCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|e| anyhow!("transport bridge is gone, dropped {:?}", e.0))
    }
}

impl TransportCommands for ChannelTransport {
    fn send_files(&self, peer: &PeerInfo, paths: &[PathBuf]) -> Result<()> {
        self.push(TransportCommand::SendFiles {
            peer: peer.clone(),
            paths: paths.to_vec(),
        })
    }

    fn cancel(&self, key: SessionKey) -> Result<()> {
        self.push(TransportCommand::Cancel { key })
    }

    fn confirm_incoming(&self, key: SessionKey, accept: bool) -> Result<()> {
        self.push(TransportCommand::ConfirmIncoming { key, accept })
    }
}

/// Applies user actions locally first, then forwards them to the transport.
#[derive(Clone)]
pub struct SessionCommandFacade {
    correlator: EventCorrelator,
    transport: Arc<dyn TransportCommands>,
}

impl SessionCommandFacade {
    pub fn new(correlator: EventCorrelator, transport: Arc<dyn TransportCommands>) -> Self {
        Self {
            correlator,
            transport,
        }
    }

    fn dispatch(&self, what: &str, key: Option<SessionKey>, result: Result<()>) {
        if let Err(e) = result {
            match key {
                Some(key) => tracing::warn!(%key, command = what, error = %e, "Transport command failed"),
                None => tracing::warn!(command = what, error = %e, "Transport command failed"),
            }
        }
    }

    /// Starts an outbound transfer. The session appears once the transport
    /// reports it opened.
    pub fn send_files(&self, peer: &PeerInfo, paths: &[PathBuf]) {
        if paths.is_empty() {
            tracing::warn!("Ignoring send request without files");
            return;
        }
        tracing::info!(files = paths.len(), peer = ?peer.device_name, "Sending files");
        self.dispatch("send_files", None, self.transport.send_files(peer, paths));
    }

    /// Marks the session canceled right away and asks the transport to stop.
    /// Sessions that already settled some other way are returned unchanged.
    pub fn request_cancel(&self, key: SessionKey) -> Result<TransferRecord, EngineError> {
        let (snapshot, canceled) = self.correlator.mark_canceled_locally(key)?;
        if canceled {
            self.dispatch("cancel", Some(key), self.transport.cancel(key));
        }
        Ok(snapshot)
    }

    /// Answers a pending inbound offer. The answer is forwarded even when no
    /// record exists yet.
    pub fn confirm_incoming(&self, key: SessionKey, accept: bool) -> Option<TransferRecord> {
        let local = if accept {
            self.correlator.accept_offer(key)
        } else {
            self.correlator.reject_offer(key)
        };
        self.dispatch(
            "confirm_incoming",
            Some(key),
            self.transport.confirm_incoming(key, accept),
        );
        match local {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::debug!(%key, accept, error = %e, "Offer answered without a local record");
                None
            }
        }
    }
}

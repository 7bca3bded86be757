//! Inbound transport callbacks and their normalized event form.

mod correlator;

pub use correlator::EventCorrelator;

use crate::common::{Direction, PeerInfo, SessionKey};
use serde::{Deserialize, Serialize};

/// One raw callback from the transport, tagged by kind.
///
/// Delivery is at-least-once: any of these may arrive twice, late, or on a
/// different thread than its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A new batch was offered (inbound) or started (outbound).
    SessionOpened {
        key: SessionKey,
        #[serde(default)]
        peer: PeerInfo,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        display_name: String,
        #[serde(default)]
        file_name: String,
        #[serde(default)]
        file_size: u64,
        #[serde(default)]
        total_file_count: u32,
        /// Inbound offers that wait for the user to accept start `Pending`.
        #[serde(default)]
        awaiting_confirmation: bool,
    },
    ProgressUpdate {
        key: SessionKey,
        #[serde(default)]
        peer: PeerInfo,
        #[serde(default)]
        bytes_sent: u64,
        #[serde(default)]
        bytes_total: u64,
        #[serde(default)]
        sent_file_count: u32,
        #[serde(default)]
        total_file_count: u32,
        #[serde(default)]
        current_file_name: String,
        #[serde(default)]
        file_size: u64,
        /// Only consulted when the transport reports no byte totals.
        #[serde(default)]
        percentage: Option<u8>,
    },
    Completed {
        key: SessionKey,
        #[serde(default)]
        peer: PeerInfo,
        #[serde(default)]
        summary: String,
    },
    Errored {
        key: SessionKey,
        #[serde(default)]
        peer: PeerInfo,
        #[serde(default)]
        message: String,
    },
    CancelAcked {
        key: SessionKey,
        #[serde(default)]
        peer: PeerInfo,
    },
}

impl TransportEvent {
    pub fn key(&self) -> SessionKey {
        match self {
            TransportEvent::SessionOpened { key, .. }
            | TransportEvent::ProgressUpdate { key, .. }
            | TransportEvent::Completed { key, .. }
            | TransportEvent::Errored { key, .. }
            | TransportEvent::CancelAcked { key, .. } => *key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::SessionOpened { .. } => "session_opened",
            TransportEvent::ProgressUpdate { .. } => "progress_update",
            TransportEvent::Completed { .. } => "completed",
            TransportEvent::Errored { .. } => "errored",
            TransportEvent::CancelAcked { .. } => "cancel_acked",
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        match self {
            TransportEvent::SessionOpened { peer, .. }
            | TransportEvent::ProgressUpdate { peer, .. }
            | TransportEvent::Completed { peer, .. }
            | TransportEvent::Errored { peer, .. }
            | TransportEvent::CancelAcked { peer, .. } => peer,
        }
    }

    /// Only opening events may create a record for an unknown key.
    pub fn opens_session(&self) -> bool {
        matches!(self, TransportEvent::SessionOpened { .. })
    }
}

/// Callback surface the native transport drives, one method per event kind.
///
/// Implementors only provide `deliver`; every method may be called from any
/// thread, concurrently, and more than once for the same occurrence.
pub trait TransportCallbacks: Send + Sync {
    fn deliver(&self, event: TransportEvent);

    #[allow(clippy::too_many_arguments)]
    fn on_session_opened(
        &self,
        key: SessionKey,
        peer: PeerInfo,
        direction: Direction,
        display_name: &str,
        file_name: &str,
        file_size: u64,
        total_file_count: u32,
        awaiting_confirmation: bool,
    ) {
        self.deliver(TransportEvent::SessionOpened {
            key,
            peer,
            direction,
            display_name: display_name.to_string(),
            file_name: file_name.to_string(),
            file_size,
            total_file_count,
            awaiting_confirmation,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn on_progress(
        &self,
        key: SessionKey,
        peer: PeerInfo,
        bytes_sent: u64,
        bytes_total: u64,
        sent_file_count: u32,
        total_file_count: u32,
        current_file_name: &str,
        file_size: u64,
        percentage: Option<u8>,
    ) {
        self.deliver(TransportEvent::ProgressUpdate {
            key,
            peer,
            bytes_sent,
            bytes_total,
            sent_file_count,
            total_file_count,
            current_file_name: current_file_name.to_string(),
            file_size,
            percentage,
        });
    }

    fn on_completed(&self, key: SessionKey, peer: PeerInfo, summary: &str) {
        self.deliver(TransportEvent::Completed {
            key,
            peer,
            summary: summary.to_string(),
        });
    }

    fn on_error(&self, key: SessionKey, peer: PeerInfo, message: &str) {
        self.deliver(TransportEvent::Errored {
            key,
            peer,
            message: message.to_string(),
        });
    }

    fn on_cancel_acked(&self, key: SessionKey, peer: PeerInfo) {
        self.deliver(TransportEvent::CancelAcked { key, peer });
    }
}

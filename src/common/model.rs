//! Session identity and the per-session transfer record.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;

/// Opaque identifier of one logical transfer (single file or batch).
///
/// The transport derives it from a timestamp, but it is never used for
/// ordering decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(u64);

impl SessionKey {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionKey {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Lifecycle status of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Canceled,
    Error,
}

impl TransferStatus {
    /// Returns true if no further status mutation is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Canceled | TransferStatus::Error
        )
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// Terminal statuses dominate: once reached, nothing moves them.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (TransferStatus::Pending, TransferStatus::Pending) => false,
            (TransferStatus::Pending, _) => true,
            (TransferStatus::InProgress, TransferStatus::Pending) => false,
            (TransferStatus::InProgress, TransferStatus::InProgress) => false,
            (TransferStatus::InProgress, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::Completed => "completed",
            TransferStatus::Canceled => "canceled",
            TransferStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Which side of the transfer this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Files arrive into the staging area and get relocated.
    #[default]
    Inbound,
    /// Local files are sent; nothing on disk is ever moved or deleted.
    Outbound,
}

/// Identity of the remote peer as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerInfo {
    pub id: Option<String>,
    pub ip: Option<String>,
    pub device_name: Option<String>,
}

impl PeerInfo {
    /// Fill in fields that `other` knows and `self` doesn't.
    /// Blank strings from the transport count as unknown.
    pub fn merge(&mut self, other: &PeerInfo) {
        fn pick(slot: &mut Option<String>, incoming: &Option<String>) {
            if let Some(value) = incoming.as_deref().map(str::trim) {
                if !value.is_empty() {
                    *slot = Some(value.to_string());
                }
            }
        }
        pick(&mut self.id, &other.id);
        pick(&mut self.ip, &other.ip);
        pick(&mut self.device_name, &other.device_name);
    }
}

/// Distinct file-system paths of one session, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniquePaths(IndexSet<PathBuf>);

impl UniquePaths {
    /// Insert a path. Returns true if it was not already present.
    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.0.insert(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.0.iter().cloned().collect()
    }
}

/// Authoritative state of one transfer session.
///
/// Values handed out by the registry are copies; mutating one has no effect
/// on the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferRecord {
    pub key: SessionKey,
    pub direction: Direction,
    pub status: TransferStatus,
    pub display_name: String,
    pub current_file_name: Option<String>,
    pub file_path: Option<PathBuf>,
    /// Final public location, set once files have been relocated.
    pub resolved_display_path: Option<PathBuf>,
    pub file_size: u64,
    pub sent_file_count: u32,
    pub total_file_count: u32,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    /// 0-100, never decreases.
    pub percentage: u8,
    pub peer: PeerInfo,
    pub error_message: Option<String>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    pub unique_paths: UniquePaths,
    /// Destinations of successfully relocated files, in relocation order.
    pub relocated_paths: Vec<PathBuf>,
    /// Global update counter at the time of the last mutation.
    pub revision: u64,
    /// True once the terminal side-effect sequence has finished.
    pub settled: bool,
    #[serde(skip)]
    pub(crate) finalize_started: bool,
    #[serde(skip)]
    pub(crate) staging_roots: Vec<PathBuf>,
}

impl TransferRecord {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status transition if the merge rules allow it.
    /// Returns true if the status changed.
    pub fn transition(&mut self, next: TransferStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == TransferStatus::Completed && self.completion_timestamp.is_none() {
            self.completion_timestamp = Some(Utc::now());
        }
        true
    }

    /// Raise the percentage, never lowering it and never touching a
    /// terminal record. Returns true if the value changed.
    pub fn raise_percentage(&mut self, percentage: u8) -> bool {
        if self.is_terminal() {
            return false;
        }
        let next = percentage.min(100);
        if next > self.percentage {
            self.percentage = next;
            true
        } else {
            false
        }
    }

    /// Downgrades a completed inbound session whose files could not be
    /// delivered at all. The only move out of a terminal status.
    pub(crate) fn fail_delivery(&mut self, message: impl Into<String>) {
        if self.status == TransferStatus::Completed {
            self.status = TransferStatus::Error;
            self.error_message = Some(message.into());
        }
    }

    /// Claims the one-shot terminal side-effect slot.
    /// Only the first caller per record gets true.
    pub(crate) fn claim_finalize(&mut self) -> bool {
        !std::mem::replace(&mut self.finalize_started, true)
    }
}

/// `bytes_total == 0` means there is nothing left to wait for.
pub fn percentage_of(bytes_sent: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 100;
    }
    let sent = bytes_sent.min(bytes_total) as u128;
    let pct = (sent * 100 + bytes_total as u128 / 2) / bytes_total as u128;
    pct.min(100) as u8
}

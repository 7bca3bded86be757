#![allow(dead_code)]

pub mod config_test_utils;

use shareflow::common::config::RelocationSettings;
use shareflow::{
    Direction, Engine, EngineConfig, PeerInfo, SessionKey, Subscription, TransferRecord,
    TransportCommand, TransportCommands, TransportEvent,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Transport that remembers every command it was given.
#[derive(Default)]
pub struct RecordingTransport {
    commands: Mutex<Vec<TransportCommand>>,
}

impl RecordingTransport {
    pub fn commands(&self) -> Vec<TransportCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: TransportCommand) -> anyhow::Result<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

impl TransportCommands for RecordingTransport {
    fn send_files(&self, peer: &PeerInfo, paths: &[PathBuf]) -> anyhow::Result<()> {
        self.record(TransportCommand::SendFiles {
            peer: peer.clone(),
            paths: paths.to_vec(),
        })
    }

    fn cancel(&self, key: SessionKey) -> anyhow::Result<()> {
        self.record(TransportCommand::Cancel { key })
    }

    fn confirm_incoming(&self, key: SessionKey, accept: bool) -> anyhow::Result<()> {
        self.record(TransportCommand::ConfirmIncoming { key, accept })
    }
}

pub struct TestEngine {
    pub engine: Engine,
    pub transport: Arc<RecordingTransport>,
    pub staging: TempDir,
    pub downloads: TempDir,
}

impl TestEngine {
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    pub fn download_dir(&self) -> &Path {
        self.downloads.path()
    }

    /// Writes a file into staging the way the transport would.
    pub fn stage(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.staging.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create staging subdir");
        }
        std::fs::write(&path, contents).expect("write staged file");
        path
    }

    pub fn record(&self, key: u64) -> TransferRecord {
        self.engine
            .get(SessionKey::new(key))
            .expect("record should exist")
    }

    /// Collects every delivered snapshot.
    pub fn collect(&self) -> (Subscription, Arc<Mutex<Vec<TransferRecord>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = self
            .engine
            .subscribe(move |snapshot| sink.lock().unwrap().push(snapshot.clone()));
        (sub, seen)
    }
}

pub fn test_config(staging: &Path, downloads: &Path) -> EngineConfig {
    let mut config = EngineConfig::with_dirs(staging, downloads);
    config.notifier.coalesce_window_ms = 0;
    config.relocation = RelocationSettings {
        attempts: 1,
        retry_delay_ms: 0,
    };
    config
}

/// Engine on the current runtime with fresh staging/download dirs.
pub fn engine_fixture() -> TestEngine {
    let staging = setup_temp_dir();
    let downloads = setup_temp_dir();
    let transport = Arc::new(RecordingTransport::default());
    let engine = Engine::new(test_config(staging.path(), downloads.path()), transport.clone())
        .expect("engine inside runtime");
    TestEngine {
        engine,
        transport,
        staging,
        downloads,
    }
}

/// Gives the notifier task a chance to flush.
pub async fn flush() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

//===============
// Event builders
//===============
pub fn opened(key: u64, total_file_count: u32) -> TransportEvent {
    TransportEvent::SessionOpened {
        key: SessionKey::new(key),
        peer: PeerInfo {
            id: Some("peer-1".into()),
            ip: Some("192.168.1.20".into()),
            device_name: Some("Pixel".into()),
        },
        direction: Direction::Inbound,
        display_name: String::new(),
        file_name: String::new(),
        file_size: 0,
        total_file_count,
        awaiting_confirmation: false,
    }
}

pub fn offered(key: u64) -> TransportEvent {
    let mut event = opened(key, 1);
    if let TransportEvent::SessionOpened {
        awaiting_confirmation,
        ..
    } = &mut event
    {
        *awaiting_confirmation = true;
    }
    event
}

pub fn outbound(key: u64) -> TransportEvent {
    TransportEvent::SessionOpened {
        key: SessionKey::new(key),
        peer: PeerInfo::default(),
        direction: Direction::Outbound,
        display_name: "mine.txt".into(),
        file_name: "mine.txt".into(),
        file_size: 10,
        total_file_count: 1,
        awaiting_confirmation: false,
    }
}

pub fn progress(
    key: u64,
    bytes_sent: u64,
    bytes_total: u64,
    sent_file_count: u32,
    file: &str,
) -> TransportEvent {
    TransportEvent::ProgressUpdate {
        key: SessionKey::new(key),
        peer: PeerInfo::default(),
        bytes_sent,
        bytes_total,
        sent_file_count,
        total_file_count: 0,
        current_file_name: file.to_string(),
        file_size: 0,
        percentage: None,
    }
}

pub fn completed(key: u64) -> TransportEvent {
    TransportEvent::Completed {
        key: SessionKey::new(key),
        peer: PeerInfo::default(),
        summary: "done".into(),
    }
}

pub fn errored(key: u64, message: &str) -> TransportEvent {
    TransportEvent::Errored {
        key: SessionKey::new(key),
        peer: PeerInfo::default(),
        message: message.to_string(),
    }
}

pub fn cancel_acked(key: u64) -> TransportEvent {
    TransportEvent::CancelAcked {
        key: SessionKey::new(key),
        peer: PeerInfo::default(),
    }
}

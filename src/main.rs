use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shareflow::common::config::{apply_overrides, load_config, ConfigOverrides};
use shareflow::common::config_commands::{run_config_path, run_config_reset, run_config_show};
use shareflow::{Engine, PeerInfo, SessionKey, TransportCommands, TransportEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "shareflow")]
#[command(about = "Transfer session engine for peer-to-peer file sharing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed recorded transport events (JSON lines) through the engine
    Replay {
        #[arg(help = "File with one transport event per line")]
        events: PathBuf,

        #[arg(long, help = "Staging directory the events' file names refer to")]
        staging: Option<PathBuf>,

        #[arg(long, help = "Where completed files are moved")]
        downloads: Option<PathBuf>,

        #[arg(long, help = "Notification coalescing window in milliseconds")]
        window_ms: Option<u64>,
    },

    /// Inspect or reset the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the config file
    Show,
    /// Overwrite the config file with defaults
    Reset {
        #[arg(long, help = "Skip the confirmation prompt")]
        yes: bool,
    },
}

/// Replay has no real transport: outbound commands are only logged.
struct LoggingTransport;

impl TransportCommands for LoggingTransport {
    fn send_files(&self, peer: &PeerInfo, paths: &[PathBuf]) -> Result<()> {
        tracing::info!(peer = ?peer.device_name, files = paths.len(), "send_files");
        Ok(())
    }

    fn cancel(&self, key: SessionKey) -> Result<()> {
        tracing::info!(%key, "cancel");
        Ok(())
    }

    fn confirm_incoming(&self, key: SessionKey, accept: bool) -> Result<()> {
        tracing::info!(%key, accept, "confirm_incoming");
        Ok(())
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shareflow=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn replay(events: &Path, overrides: ConfigOverrides) -> Result<()> {
    let config = apply_overrides(load_config()?, &overrides)?;
    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.download_dir.display()))?;

    let engine = Engine::new(config, Arc::new(LoggingTransport))?;

    let file = tokio::fs::File::open(events)
        .await
        .with_context(|| format!("Failed to open {}", events.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<TransportEvent>(line) {
            Ok(event) => {
                engine.handle_event(event);
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "Skipping malformed event"),
        }
    }

    engine.settle().await;

    for record in engine.snapshot_all() {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            events,
            staging,
            downloads,
            window_ms,
        } => {
            let overrides = ConfigOverrides {
                staging_dir: staging,
                download_dir: downloads,
                coalesce_window_ms: window_ms,
            };
            replay(&events, overrides).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Path => run_config_path(),
            ConfigAction::Show => run_config_show(),
            ConfigAction::Reset { yes } => run_config_reset(yes).map(|_| ()),
        },
    }
}

//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI
use anyhow::{ensure, Context, Result};
use directories::{ProjectDirs, UserDirs};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_COALESCE_WINDOW_MS: u64 = 5_000;
pub const MAX_RETRY_DELAY_MS: u64 = 5_000;
const MAX_RELOCATION_ATTEMPTS: u32 = 10;

const ENV_PREFIX: &str = "SHAREFLOW_";

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "shareflow")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("shareflow.toml"))
}

fn default_staging_dir() -> PathBuf {
    ProjectDirs::from("", "", "shareflow")
        .map(|p| p.cache_dir().join("staging"))
        .unwrap_or_else(|| PathBuf::from("shareflow-staging"))
}

fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| {
            dirs.download_dir()
                .map(Path::to_path_buf)
                .or_else(|| Some(dirs.home_dir().join("Downloads")))
        })
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Change notification tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSettings {
    /// Rapid publishes for one session inside this window collapse to the latest.
    pub coalesce_window_ms: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 100,
        }
    }
}

impl NotifierSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

/// Retry policy for moving staged files to their final location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocationSettings {
    pub attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RelocationSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 50,
        }
    }
}

impl RelocationSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Fully resolved engine configuration after all layers merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Private area the transport writes incoming files into.
    pub staging_dir: PathBuf,
    /// Public destination for completed inbound files.
    pub download_dir: PathBuf,
    pub notifier: NotifierSettings,
    pub relocation: RelocationSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            download_dir: default_download_dir(),
            notifier: NotifierSettings::default(),
            relocation: RelocationSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Config rooted at explicit directories, other settings defaulted.
    pub fn with_dirs(staging_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            download_dir: download_dir.into(),
            ..Self::default()
        }
    }

    /// Validates bounds and directory layout, rejecting unsafe values.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.staging_dir.as_os_str().is_empty(),
            "Invalid config: staging_dir must not be empty"
        );
        ensure!(
            !self.download_dir.as_os_str().is_empty(),
            "Invalid config: download_dir must not be empty"
        );
        ensure!(
            self.staging_dir != self.download_dir,
            "Invalid config: staging_dir and download_dir must differ"
        );
        ensure!(
            !self.download_dir.starts_with(&self.staging_dir),
            "Invalid config: download_dir must not be inside staging_dir"
        );
        ensure!(
            self.notifier.coalesce_window_ms <= MAX_COALESCE_WINDOW_MS,
            "Invalid config: notifier.coalesce_window_ms must be <= {MAX_COALESCE_WINDOW_MS}"
        );
        ensure!(
            self.relocation.attempts >= 1,
            "Invalid config: relocation.attempts must be >= 1"
        );
        ensure!(
            self.relocation.attempts <= MAX_RELOCATION_ATTEMPTS,
            "Invalid config: relocation.attempts must be <= {MAX_RELOCATION_ATTEMPTS}"
        );
        ensure!(
            self.relocation.retry_delay_ms <= MAX_RETRY_DELAY_MS,
            "Invalid config: relocation.retry_delay_ms must be <= {MAX_RETRY_DELAY_MS}"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coalesce_window_ms: Option<u64>,
}

/// Loads config from defaults/file/env.
pub fn load_config() -> Result<EngineConfig> {
    load_config_from(&config_path())
}

/// Loads config using an explicit file path for the file layer.
pub fn load_config_from(path: &Path) -> Result<EngineConfig> {
    let config: EngineConfig = Figment::new()
        .merge(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("Failed to load configuration")?;

    config.validate()?;

    Ok(config)
}

/// Applies runtime overrides to a loaded config and re-validates it.
pub fn apply_overrides(mut config: EngineConfig, overrides: &ConfigOverrides) -> Result<EngineConfig> {
    if let Some(staging_dir) = &overrides.staging_dir {
        config.staging_dir = staging_dir.clone();
    }
    if let Some(download_dir) = &overrides.download_dir {
        config.download_dir = download_dir.clone();
    }
    if let Some(window) = overrides.coalesce_window_ms {
        config.notifier.coalesce_window_ms = window;
    }

    config.validate()?;
    Ok(config)
}

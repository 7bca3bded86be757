//! CLI handlers for `config` subcommands.

mod io;
mod render;
mod reset;

use crate::common::config::{config_path, load_config, EngineConfig};
use anyhow::{Context, Result};

fn defaults_toml() -> Result<String> {
    toml::to_string_pretty(&EngineConfig::default()).context("Failed to serialize default config")
}

/// Print where the config file is read from.
pub fn run_config_path() -> Result<()> {
    render::write_path(&config_path(), &mut std::io::stdout().lock())
}

/// Print the effective config after file and environment layers merge.
pub fn run_config_show() -> Result<()> {
    let config = load_config()?;
    render::write_effective(
        &config,
        &config_path(),
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    )
}

/// Reset config to defaults, asking first unless `yes`.
pub fn run_config_reset(yes: bool) -> Result<bool> {
    reset::reset_config(&config_path(), yes)
}

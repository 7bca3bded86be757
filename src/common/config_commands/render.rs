//! Printing config locations and the effective settings.

use crate::common::config::EngineConfig;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

pub(super) fn write_path(path: &Path, output: &mut dyn Write) -> Result<()> {
    writeln!(output, "{}", path.display())?;
    Ok(())
}

/// Writes the merged config as TOML to `output`. Where it came from goes
/// to `notes` so `output` stays valid TOML.
pub(super) fn write_effective(
    config: &EngineConfig,
    file: &Path,
    output: &mut dyn Write,
    notes: &mut dyn Write,
) -> Result<()> {
    if file.exists() {
        writeln!(notes, "# merged from defaults, {} and SHAREFLOW_* env", file.display())?;
    } else {
        writeln!(notes, "# no config file at {}, showing defaults and SHAREFLOW_* env", file.display())?;
    }

    let text = toml::to_string_pretty(config).context("Failed to render config")?;
    output.write_all(text.as_bytes())?;
    Ok(())
}

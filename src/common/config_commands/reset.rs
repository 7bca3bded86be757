//! Restoring config defaults.

use super::defaults_toml;
use super::io::atomic_write;
use anyhow::{bail, Context, Result};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

fn confirmed(prompt: &str, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<bool> {
    write!(output, "{prompt} [y/N]: ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

pub(super) fn reset_config(path: &Path, yes: bool) -> Result<bool> {
    let interactive = std::io::stdin().is_terminal();
    reset_config_with_io(
        path,
        yes,
        interactive,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout().lock(),
    )
}

/// Overwrites `path` with the defaults. An existing file is kept next to
/// it as `<name>.bak`. Without `yes` this asks first, and refuses outright
/// when nobody can answer.
fn reset_config_with_io(
    path: &Path,
    yes: bool,
    interactive: bool,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<bool> {
    if !yes {
        if !interactive {
            bail!("Refusing to reset config in non-interactive mode. Use --yes");
        }
        let prompt = format!("Replace {} with defaults?", path.display());
        if !confirmed(&prompt, input, output)? {
            writeln!(output, "Left {} unchanged.", path.display())?;
            return Ok(false);
        }
    }

    if path.exists() {
        let backup = backup_path(path);
        std::fs::copy(path, &backup)
            .with_context(|| format!("Failed to back up config to {}", backup.display()))?;
        writeln!(output, "Previous config saved as {}", backup.display())?;
    }

    atomic_write(path, &defaults_toml()?)?;
    writeln!(output, "Wrote default config to {}", path.display())?;
    Ok(true)
}

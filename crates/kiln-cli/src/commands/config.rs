//! Configuration commands.

use super::{get_config, get_paths};
use anyhow::{Context, Result};
use colored::Colorize;

/// Print the effective configuration, defaults included.
pub fn show() -> Result<()> {
    let config = get_config()?;
    let paths = get_paths(&config)?;

    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;

    println!("{}", "Current Configuration".cyan().bold());
    println!("{}", "─".repeat(50));
    if !paths.config_file.exists() {
        println!(
            "{}",
            "# No config file yet; showing defaults. Run 'kiln init' to write one.".dimmed()
        );
    }
    println!("{}", rendered);

    Ok(())
}

pub fn path() -> Result<()> {
    let config = get_config()?;
    let paths = get_paths(&config)?;
    println!("{}", paths.config_file.display());
    Ok(())
}

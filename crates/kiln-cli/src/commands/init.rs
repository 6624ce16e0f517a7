//! Initialize Kiln.

use super::{get_config, get_paths};
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_config::Config;
use kiln_db::Database;

pub fn run() -> Result<()> {
    let config = get_config()?;
    let paths = get_paths(&config)?;

    if paths.is_initialized() {
        println!("{} Kiln is already initialized.", "Note:".yellow().bold());
        println!("  Config: {}", paths.config_file.display());
        println!("  Database: {}", paths.database_file.display());
        return Ok(());
    }

    println!("{}", "Initializing Kiln...".cyan().bold());

    paths.ensure_dirs().context("Failed to create directories")?;
    println!("  {} Created directories", "✓".green());

    if !paths.config_file.exists() {
        Config::create_default_file(&paths.config_file).context("Failed to create config file")?;
        println!(
            "  {} Created config: {}",
            "✓".green(),
            paths.config_file.display()
        );
    }

    let _db = Database::open(&paths.database_file).context("Failed to initialize database")?;
    println!(
        "  {} Created database: {}",
        "✓".green(),
        paths.database_file.display()
    );
    println!("  {} Blob storage: {}", "✓".green(), paths.blob_dir.display());

    println!();
    println!("{}", "Kiln initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Point [llm] at a chat-completion server: {}", paths.config_file.display().to_string().cyan());
    println!("  2. Upload a file: {}", "kiln upload ./manual.pdf".cyan());
    println!("  3. Start the workers: {}", "kiln worker".cyan());

    Ok(())
}

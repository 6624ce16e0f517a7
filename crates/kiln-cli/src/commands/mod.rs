//! CLI command implementations.

pub mod config;
pub mod init;
pub mod process;
pub mod records;
pub mod show;
pub mod status;
pub mod upload;
pub mod worker;

use anyhow::{Context, Result};
use kiln_config::{AppPaths, Config};
use kiln_db::Database;
use kiln_extract::{LayoutConverter, MineruConverter};
use kiln_llm::{ChatClient, Generator};
use kiln_pipeline::{
    BlobStore, Deriver, ExtractionSelector, FsBlobStore, Orchestrator, Uploader, WorkerPool,
};
use std::sync::Arc;

/// Load the configuration from the default location.
pub fn get_config() -> Result<Config> {
    Config::load().context("Failed to load config")
}

/// Resolve application paths, honoring data directory overrides.
pub fn get_paths(config: &Config) -> Result<AppPaths> {
    config
        .resolve_paths()
        .context("Failed to determine application directories")
}

/// Open the database, ensuring kiln is initialized.
pub fn get_database(config: &Config) -> Result<Database> {
    let paths = get_paths(config)?;

    if !paths.is_initialized() {
        anyhow::bail!("Kiln is not initialized. Run 'kiln init' first.");
    }

    Database::open(&paths.database_file).context("Failed to open database")
}

/// Everything a command needs to upload and process files.
pub struct Pipeline {
    pub uploader: Uploader,
    pub workers: WorkerPool,
}

/// Wire the configured generator, layout converter and blob store into a
/// worker pool and an uploader that wakes it.
pub fn build_pipeline(config: &Config, db: Database) -> Result<Pipeline> {
    let generator: Arc<dyn Generator> =
        Arc::new(ChatClient::from_config(&config.llm).context("Failed to configure LLM client")?);
    let layout: Arc<dyn LayoutConverter> =
        Arc::new(MineruConverter::from_config(&config.extraction));
    let blobs: Arc<dyn BlobStore> =
        Arc::new(FsBlobStore::from_config(config).context("Failed to set up blob storage")?);

    let selector = ExtractionSelector::new(&config.extraction, generator.clone(), Some(layout));
    let deriver = Deriver::new(generator, config.derivation.clone());
    let orchestrator = Orchestrator::new(db.clone(), blobs.clone(), selector, deriver)
        .with_inline_limit(config.storage.inline_max_bytes);

    let workers = WorkerPool::new(orchestrator, &config.worker);
    let uploader = Uploader::new(db, blobs).with_workers(workers.handle());

    Ok(Pipeline { uploader, workers })
}

/// Format a file size in human-readable form.
pub fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// First `max` characters of `text` on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

/// Short form of an ID for listings.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_preview_flattens_and_cuts() {
        assert_eq!(preview("a\n  b", 10), "a b");
        assert_eq!(preview("abcdefghijkl", 8), "abcde...");
        assert_eq!(preview("设备维护手册第一章", 5), "设备...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}

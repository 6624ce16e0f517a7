//! Upload command - store a file and queue it for processing.

use super::{build_pipeline, format_size, get_config, get_database, process::print_report};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::FileKind;
use kiln_pipeline::UploadOptions;
use std::path::Path;
use tokio::runtime::Runtime;

/// Options collected from the command line.
pub struct UploadArgs {
    pub by: String,
    pub kind: Option<String>,
    pub mime_type: Option<String>,
    pub department: Option<String>,
    pub priority: i32,
    pub now: bool,
}

pub fn run(path: &Path, args: UploadArgs) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let kind = match args.kind.as_deref() {
        Some(raw) => Some(
            FileKind::from_str(raw).ok_or_else(|| anyhow::anyhow!("Unknown file kind: {}", raw))?,
        ),
        None => None,
    };

    let pipeline = build_pipeline(&config, db)?;
    let rt = Runtime::new().context("Failed to create async runtime")?;

    let options = UploadOptions {
        uploaded_by: args.by,
        name: None,
        kind,
        mime_type: args.mime_type,
        department: args.department,
        priority: args.priority,
    };

    let file = rt
        .block_on(pipeline.uploader.upload(path, options))
        .with_context(|| format!("Failed to upload {}", path.display()))?;

    println!(
        "{} {} ({}, {})",
        "Queued:".green().bold(),
        file.name,
        file.kind,
        format_size(file.file_size)
    );
    println!("  ID: {}", file.id);
    println!("  URL: {}", file.file_url.dimmed());

    if !args.now {
        println!();
        println!(
            "{}",
            "Run 'kiln worker' to process the queue.".dimmed()
        );
        return Ok(());
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Processing {}", file.name));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let report = rt.block_on(pipeline.workers.process_now(&file.id));
    pb.finish_and_clear();

    print_report(&file.name, &report?);
    Ok(())
}

//! Process command - run one source file through the pipeline inline.

use super::{build_pipeline, get_config, get_database};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::FileStatus;
use kiln_pipeline::ProcessReport;
use tokio::runtime::Runtime;

pub fn run(id: &str) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let file = db.get_source_file(id)?;
    let pipeline = build_pipeline(&config, db)?;
    let rt = Runtime::new().context("Failed to create async runtime")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Processing {}", file.name));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let report = rt.block_on(pipeline.workers.process_now(&file.id));
    pb.finish_and_clear();

    print_report(&file.name, &report?);
    Ok(())
}

/// Print the outcome of one processing run.
pub fn print_report(name: &str, report: &ProcessReport) {
    match report.status {
        FileStatus::Completed => {
            println!("{} {}", "Completed:".green().bold(), name);
        }
        _ => {
            println!("{} {}", "Failed:".red().bold(), name);
        }
    }

    if let Some(method) = report.method {
        println!("  Method: {}", method);
    }
    println!("  Extracted: {} chars", report.extracted_chars);
    println!("  Knowledge items: {}", report.knowledge_items);
    println!("  Q&A pairs: {}", report.qa_pairs);

    if !report.failed_stages.is_empty() {
        let stages: Vec<String> = report.failed_stages.iter().map(|s| s.to_string()).collect();
        println!("  {} {}", "Failed stages:".yellow(), stages.join(", "));
    }
    if let Some(ref error) = report.error {
        println!("  {}", error.red());
    }
}

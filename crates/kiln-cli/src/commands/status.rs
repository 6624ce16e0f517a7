//! Status command - record counts, queue status and tool availability.

use super::{format_size, get_config, get_database, short_id};
use anyhow::Result;
use colored::Colorize;
use kiln_core::QueueStatus;

pub fn run() -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let stats = db.stats()?;

    println!("{}", "Kiln Status".cyan().bold());
    println!("{}", "─".repeat(50));

    println!();
    println!("{}", "Source Files".white().bold());
    println!("  Total: {}", stats.total_sources.to_string().green());
    let mut by_status: Vec<_> = stats.sources_by_status.iter().collect();
    by_status.sort();
    for (status, count) in by_status {
        println!("    {}: {}", status, count);
    }
    let mut by_kind: Vec<_> = stats.sources_by_kind.iter().collect();
    by_kind.sort();
    for (kind, count) in by_kind {
        println!("    {} {}: {}", "•".dimmed(), kind, count);
    }

    println!();
    println!("{}", "Derived Records".white().bold());
    println!("  Processing tasks: {}", stats.total_tasks);
    if stats.failed_tasks > 0 {
        println!("    Failed: {}", stats.failed_tasks.to_string().red());
    }
    println!("  Knowledge items: {}", stats.total_knowledge_items);
    println!("  Q&A pairs: {}", stats.total_qa_pairs);

    let counts = db.queue_counts()?;
    println!();
    println!("{}", "Processing Queue".white().bold());
    println!("  {} Pending: {}", "○".yellow(), counts.pending);
    println!("  {} Processing: {}", "◐".blue(), counts.processing);
    println!("  {} Done: {}", "●".green(), counts.done);
    if counts.failed > 0 {
        println!("  {} Failed: {}", "✗".red(), counts.failed);
    }

    let failed = db.list_queue(Some(QueueStatus::Failed))?;
    if !failed.is_empty() {
        println!();
        println!("{}", "Recent Failures".red().bold());
        for job in failed.iter().take(3) {
            println!("  {} source {}", "✗".red(), short_id(&job.source_id));
            if let Some(ref err) = job.error {
                println!("    {}", err.dimmed());
            }
        }
    }

    println!();
    println!("{}", "Tools".white().bold());
    for (tool, available) in kiln_extract::check_dependencies(&config.extraction.layout_command) {
        let mark = if available { "✓".green() } else { "✗".red() };
        println!("  {} {}", mark, tool);
    }
    println!("  LLM: {} ({})", config.llm.model, config.llm.host.dimmed());

    println!();
    println!("  Database size: {}", format_size(stats.database_size_bytes));

    if counts.pending == 0 && counts.processing == 0 {
        println!();
        println!(
            "{}",
            "No jobs in queue. Use 'kiln upload <path>' to add content.".dimmed()
        );
    }

    Ok(())
}

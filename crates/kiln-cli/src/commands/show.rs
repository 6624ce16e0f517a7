//! Show command - display a source file with everything derived from it.

use super::{format_size, get_config, get_database, preview};
use anyhow::Result;
use colored::Colorize;
use kiln_core::{FileKind, KnowledgeFilter, TaskStatus};

pub fn run(id: &str) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    run_with_db(&db, id)
}

/// Run show with an existing database connection.
pub fn run_with_db(db: &kiln_db::Database, id: &str) -> Result<()> {
    let file = db.get_source_file(id)?;

    let kind_icon = match file.kind {
        FileKind::Document => "📄",
        FileKind::Image => "🖼️",
        FileKind::Video => "🎬",
        FileKind::Audio => "🎵",
        FileKind::Other => "📁",
    };

    println!("{} {}", kind_icon, file.name.white().bold());
    println!("{}", "─".repeat(70));

    println!("  {}: {}", "ID".cyan(), file.id);
    println!("  {}: {}", "Kind".cyan(), file.kind);
    println!("  {}: {}", "Status".cyan(), file.status);
    println!("  {}: {}", "Media type".cyan(), file.effective_media_type());
    println!("  {}: {}", "Size".cyan(), format_size(file.file_size));
    println!("  {}: {}", "Uploaded by".cyan(), file.uploaded_by);
    if let Some(ref department) = file.department {
        println!("  {}: {}", "Department".cyan(), department);
    }
    println!("  {}: {}", "URL".cyan(), file.file_url);
    if let Some(ref hash) = file.content_hash {
        println!("  {}: {}", "Hash".cyan(), hash);
    }
    println!(
        "  {}: {}",
        "Created".cyan(),
        file.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    let tasks = db.list_tasks(Some(file.id.as_str()))?;
    if !tasks.is_empty() {
        println!();
        println!("{}", "Tasks".white().bold());
        println!("{}", "─".repeat(70));
        for task in &tasks {
            let icon = match task.status {
                TaskStatus::Pending => "○".yellow(),
                TaskStatus::Processing => "◐".blue(),
                TaskStatus::Completed => "●".green(),
                TaskStatus::Failed => "✗".red(),
            };
            print!("  {} {} ({}%)", icon, task.kind, task.progress);
            if let Some(ref result) = task.result {
                print!(" {}", result.to_string().dimmed());
            }
            println!();
            if let Some(ref message) = task.error_message {
                println!("      {}", message.red());
            }
        }
    }

    let items = db.list_knowledge_items(&KnowledgeFilter::new().for_source(file.id.clone()))?;
    if !items.is_empty() {
        println!();
        println!("{} ({})", "Knowledge Items".white().bold(), items.len());
        println!("{}", "─".repeat(70));

        if let Some(summary) = items.iter().find_map(|i| i.summary.as_ref()) {
            println!("{}", summary);
            println!();
        }

        for item in items.iter().take(3) {
            println!("{}", item.title.white());
            println!("{}", preview(&item.content, 200).dimmed());
            println!();
        }
        if items.len() > 3 {
            println!(
                "{}",
                format!("... and {} more items", items.len() - 3).dimmed()
            );
        }
    }

    let pairs = db.list_qa_pairs(Some(file.id.as_str()))?;
    if !pairs.is_empty() {
        println!();
        println!("{} ({})", "Q&A Pairs".white().bold(), pairs.len());
        println!("{}", "─".repeat(70));
        for pair in &pairs {
            println!("  {} {}", "Q:".cyan(), pair.question);
            println!("  {} {}", "A:".green(), preview(&pair.answer, 200));
        }
    }

    Ok(())
}

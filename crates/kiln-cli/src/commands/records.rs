//! Read-only listings of source files, tasks, knowledge items and Q&A pairs.

use super::{format_size, get_config, get_database, preview, short_id};
use anyhow::Result;
use colored::Colorize;
use kiln_core::{FileStatus, KnowledgeFilter, KnowledgeType, ReviewStatus, TaskStatus};

pub fn sources(status: Option<String>, limit: usize) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let status = match status.as_deref() {
        Some(raw) => Some(
            FileStatus::from_str(raw).ok_or_else(|| anyhow::anyhow!("Unknown status: {}", raw))?,
        ),
        None => None,
    };

    let files = db.list_source_files(status, Some(limit))?;
    if files.is_empty() {
        println!("{}", "No source files. Use 'kiln upload <path>' to add one.".dimmed());
        return Ok(());
    }

    println!("{}", "Source Files".cyan().bold());
    println!("{}", "─".repeat(70));

    for file in &files {
        let status = match file.status {
            FileStatus::Pending => file.status.to_string().yellow(),
            FileStatus::Processing => file.status.to_string().blue(),
            FileStatus::Completed => file.status.to_string().green(),
            FileStatus::Failed => file.status.to_string().red(),
        };
        println!(
            "  {} {} [{}] {} {}",
            short_id(&file.id).dimmed(),
            file.name.white().bold(),
            file.kind,
            status,
            format_size(file.file_size).dimmed()
        );
    }

    Ok(())
}

pub fn tasks(source: Option<String>) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let tasks = db.list_tasks(source.as_deref())?;
    if tasks.is_empty() {
        println!("{}", "No processing tasks.".dimmed());
        return Ok(());
    }

    println!("{}", "Processing Tasks".cyan().bold());
    println!("{}", "─".repeat(70));

    for task in &tasks {
        let (icon, status) = match task.status {
            TaskStatus::Pending => ("○".yellow(), task.status.to_string().yellow()),
            TaskStatus::Processing => ("◐".blue(), task.status.to_string().blue()),
            TaskStatus::Completed => ("●".green(), task.status.to_string().green()),
            TaskStatus::Failed => ("✗".red(), task.status.to_string().red()),
        };
        println!(
            "  {} {} {:<14} {} {:>3}%  source {}",
            icon,
            short_id(&task.id).dimmed(),
            task.kind.to_string(),
            status,
            task.progress,
            short_id(&task.source_id)
        );
        if let Some(ref message) = task.error_message {
            println!("      {}", preview(message, 100).dimmed());
        }
    }

    Ok(())
}

pub fn knowledge(
    source: Option<String>,
    knowledge_type: Option<String>,
    status: Option<String>,
) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let mut filter = KnowledgeFilter::new();
    if let Some(source) = source {
        filter = filter.for_source(source);
    }
    if let Some(raw) = knowledge_type.as_deref() {
        let parsed = KnowledgeType::from_str(raw)
            .ok_or_else(|| anyhow::anyhow!("Unknown knowledge type: {}", raw))?;
        filter = filter.with_type(parsed);
    }
    if let Some(raw) = status.as_deref() {
        let parsed = ReviewStatus::from_str(raw)
            .ok_or_else(|| anyhow::anyhow!("Unknown review status: {}", raw))?;
        filter = filter.with_status(parsed);
    }

    let items = db.list_knowledge_items(&filter)?;
    if items.is_empty() {
        println!("{}", "No knowledge items.".dimmed());
        return Ok(());
    }

    println!("{}", "Knowledge Items".cyan().bold());
    println!("{}", "─".repeat(70));

    for item in &items {
        println!(
            "  {} {} [{} / {}]",
            short_id(&item.id).dimmed(),
            item.title.white().bold(),
            item.knowledge_type,
            item.status
        );
        if let Some(ref tags) = item.tags {
            if !tags.is_empty() {
                println!("      {}", tags.join(", ").yellow());
            }
        }
        println!("      {}", preview(&item.content, 100).dimmed());
    }

    Ok(())
}

pub fn qa(source: Option<String>) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let pairs = db.list_qa_pairs(source.as_deref())?;
    if pairs.is_empty() {
        println!("{}", "No Q&A pairs.".dimmed());
        return Ok(());
    }

    println!("{}", "Q&A Pairs".cyan().bold());
    println!("{}", "─".repeat(70));

    for pair in &pairs {
        println!(
            "  {} {} {}",
            short_id(&pair.id).dimmed(),
            "Q:".cyan(),
            pair.question
        );
        println!("           {} {}", "A:".green(), preview(&pair.answer, 120));
    }

    Ok(())
}

//! Worker command - run the queue workers.

use super::{build_pipeline, get_config, get_database, process::print_report};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::runtime::Runtime;
use tracing::{error, info};

pub fn run(once: bool, concurrency: Option<usize>) -> Result<()> {
    let mut config = get_config()?;
    if let Some(n) = concurrency {
        config.worker.concurrency = n.max(1);
    }
    let db = get_database(&config)?;

    let missing: Vec<_> = kiln_extract::check_dependencies(&config.extraction.layout_command)
        .into_iter()
        .filter(|(_, available)| !available)
        .collect();
    if config.extraction.layout_enabled && !missing.is_empty() {
        println!("{}", "Warning: layout conversion tools are not available:".yellow());
        for (tool, _) in &missing {
            println!("  - {}", tool);
        }
        println!("Papers and reports will use the structured parsers instead.\n");
    }

    let pipeline = build_pipeline(&config, db)?;
    let rt = Runtime::new().context("Failed to create async runtime")?;

    if once {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message("Draining queue");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let reports = rt.block_on(pipeline.workers.drain())?;
        pb.finish_and_clear();

        if reports.is_empty() {
            println!("{}", "Queue is empty.".dimmed());
        }
        for report in &reports {
            print_report(&report.source_id, report);
        }
        return Ok(());
    }

    println!(
        "{} {} workers. Press Ctrl+C to stop.\n",
        "Starting".cyan(),
        config.worker.concurrency
    );

    let workers = pipeline.workers;
    rt.block_on(async move {
        let handle = workers.handle();
        let runner = tokio::spawn(async move { workers.run().await });

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Shutting down, waiting for running jobs");
        handle.shutdown();

        runner.await.context("Worker pool panicked")??;
        Ok::<_, anyhow::Error>(())
    })?;

    println!("{}", "Workers stopped.".green());
    Ok(())
}

//! Kiln CLI - turn uploaded files into reviewable knowledge

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Kiln - ingestion pipeline for the knowledge base
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(about = "Turn uploaded files into knowledge items and Q&A pairs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Kiln (create config, database and blob directory)
    Init,

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Upload a file and queue it for processing
    Upload {
        /// Path to the file
        path: PathBuf,

        /// Who is uploading
        #[arg(short, long, env = "USER", default_value = "kiln")]
        by: String,

        /// Override the kind guessed from the extension
        /// (document, image, video, audio, other)
        #[arg(short, long)]
        kind: Option<String>,

        /// Override the media type guessed from the extension
        #[arg(long)]
        mime_type: Option<String>,

        /// Owning department
        #[arg(short, long)]
        department: Option<String>,

        /// Queue priority (higher runs first)
        #[arg(short, long, default_value = "0")]
        priority: i32,

        /// Process right away instead of leaving it for the workers
        #[arg(long)]
        now: bool,
    },

    /// Run queue workers
    Worker {
        /// Drain the queue and exit instead of running until Ctrl+C
        #[arg(long)]
        once: bool,

        /// Number of concurrent workers (default: from config)
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Process one pending source file now
    Process {
        /// Source file ID
        id: String,
    },

    /// List source files
    Sources {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of files to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a source file with its tasks and derived records
    Show {
        /// Source file ID
        id: String,
    },

    /// List processing tasks
    Tasks {
        /// Only tasks for this source file
        #[arg(short, long)]
        source: Option<String>,
    },

    /// List knowledge items
    Knowledge {
        /// Only items from this source file
        #[arg(short, long)]
        source: Option<String>,

        /// Filter by type (rag, sft, pretrain, multimodal)
        #[arg(short = 't', long = "type")]
        knowledge_type: Option<String>,

        /// Filter by review status (draft, reviewed, published)
        #[arg(long)]
        status: Option<String>,
    },

    /// List Q&A pairs
    Qa {
        /// Only pairs from this source file
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Show record counts, queue status and tool availability
    Status,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::show(),
            ConfigCommands::Path => commands::config::path(),
        },
        Commands::Upload {
            path,
            by,
            kind,
            mime_type,
            department,
            priority,
            now,
        } => commands::upload::run(
            &path,
            commands::upload::UploadArgs {
                by,
                kind,
                mime_type,
                department,
                priority,
                now,
            },
        ),
        Commands::Worker { once, concurrency } => commands::worker::run(once, concurrency),
        Commands::Process { id } => commands::process::run(&id),
        Commands::Sources { status, limit } => commands::records::sources(status, limit),
        Commands::Show { id } => commands::show::run(&id),
        Commands::Tasks { source } => commands::records::tasks(source),
        Commands::Knowledge {
            source,
            knowledge_type,
            status,
        } => commands::records::knowledge(source, knowledge_type, status),
        Commands::Qa { source } => commands::records::qa(source),
        Commands::Status => commands::status::run(),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

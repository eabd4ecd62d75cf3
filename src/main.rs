//! # CaseClip CLI
//!
//! The `caseclip` binary drives the capture pipeline: it runs the buffer
//! monitor, inspects buffer or file content for case identifiers, synthesizes
//! Support Context Protocols, and manages the persisted artifact directory.
//!
//! ## Usage
//!
//! ```bash
//! caseclip --config ./caseclip.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `caseclip run` | Start the buffer monitor until Ctrl-C |
//! | `caseclip inspect` | One-shot extraction diagnostic |
//! | `caseclip protocol <file>` | Synthesize the Support Context Protocol |
//! | `caseclip list` | List persisted capture artifacts |
//! | `caseclip purge --days <n>` | Remove captures older than n days |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caseclip::analyzer::ContextAnalyzer;
use caseclip::clipboard::{ClipboardSource, FileBuffer};
use caseclip::config::{load_config, Config};
use caseclip::monitor::{inspect_text, CaptureCallback, ClipboardMonitor};
use caseclip::notify::{LogSink, NotificationSink};
use caseclip::parser::CaseParser;
use caseclip::protocol;
use caseclip::storage::StorageManager;

/// CaseClip — clipboard capture and support-case context analysis.
#[derive(Parser)]
#[command(
    name = "caseclip",
    about = "Clipboard capture and support-case context analysis pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./caseclip.toml")]
    config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the buffer monitor.
    ///
    /// Polls the shared buffer at the configured interval, saves valid
    /// captures with metadata, and runs background enrichment when
    /// `context_processing_enabled` is set. Runs until Ctrl-C.
    Run {
        /// Spool file standing in for the shared text buffer.
        #[arg(long, default_value = "./caseclip-buffer.txt")]
        buffer_file: PathBuf,
    },

    /// Inspect content for case identifiers.
    ///
    /// Prints extracted IDs, the derived filename, and strict validation
    /// findings. Reads the buffer spool file unless `--file` is given.
    Inspect {
        /// Inspect this file instead of the buffer.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Spool file standing in for the shared text buffer.
        #[arg(long, default_value = "./caseclip-buffer.txt")]
        buffer_file: PathBuf,
    },

    /// Synthesize the Support Context Protocol for a file.
    ///
    /// Runs the full analysis pass and prints the protocol as JSON, or as
    /// the condensed human-readable rendering with `--condensed`.
    Protocol {
        /// File containing the capture content.
        file: PathBuf,

        /// Print the condensed rendering instead of JSON.
        #[arg(long)]
        condensed: bool,
    },

    /// List persisted capture artifacts, newest first.
    List,

    /// Remove captures (and their companion files) older than a cutoff.
    Purge {
        /// Age cutoff in days.
        #[arg(long, default_value_t = 30)]
        days: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("caseclip={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run { buffer_file } => run_monitor(config, buffer_file).await,
        Commands::Inspect { file, buffer_file } => run_inspect(file, buffer_file),
        Commands::Protocol { file, condensed } => run_protocol(config, file, condensed).await,
        Commands::List => run_list(config),
        Commands::Purge { days } => run_purge(config, days).await,
    }
}

async fn run_monitor(config: Config, buffer_file: PathBuf) -> Result<()> {
    let analyzer = config
        .context_processing_enabled
        .then(|| Arc::new(ContextAnalyzer::new(&config)));
    let storage = Arc::new(StorageManager::new(&config, analyzer));
    let source: Arc<dyn ClipboardSource> = Arc::new(FileBuffer::new(buffer_file));

    let callback: Option<CaptureCallback> = if config.enable_notifications {
        let sink = Arc::new(LogSink);
        Some(Arc::new(move |outcome| {
            let title = if outcome.success {
                "Case data saved"
            } else {
                "Save failed"
            };
            sink.notify(title, &outcome.message, !outcome.success);
        }))
    } else {
        None
    };

    let monitor = ClipboardMonitor::new(config, Arc::clone(&storage), source, callback);
    monitor.start();
    println!("monitoring started (Ctrl-C to stop)");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    // Stop the monitor first so nothing new is queued, then drain
    // in-flight enrichment.
    monitor.stop().await;
    storage.shutdown().await;
    println!("stopped");
    Ok(())
}

fn run_inspect(file: Option<PathBuf>, buffer_file: PathBuf) -> Result<()> {
    let content = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => match FileBuffer::new(buffer_file).read() {
            Ok(Some(content)) => content,
            Ok(None) => {
                println!("no buffer content");
                return Ok(());
            }
            Err(e) => anyhow::bail!("buffer read failed: {}", e),
        },
    };

    let report = inspect_text(&CaseParser::new(), &content);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_protocol(config: Config, file: PathBuf, condensed: bool) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let analyzer = Arc::new(ContextAnalyzer::new(&config));
    let protocol = protocol::synthesize(&analyzer, &content).await;

    if condensed {
        print!("{}", protocol::render_condensed(&protocol));
    } else {
        println!("{}", serde_json::to_string_pretty(&protocol)?);
    }
    Ok(())
}

fn run_list(config: Config) -> Result<()> {
    let storage = StorageManager::new(&config, None);
    let artifacts = storage.list_artifacts();
    if artifacts.is_empty() {
        println!("no captures in {}", storage.output_dir().display());
        return Ok(());
    }
    for path in artifacts {
        println!("{}", path.display());
    }
    Ok(())
}

async fn run_purge(config: Config, days: u64) -> Result<()> {
    let storage = StorageManager::new(&config, None);
    let removed = storage
        .purge_older_than(Duration::from_secs(days * 24 * 60 * 60))
        .await?;
    println!("removed {} old capture(s)", removed);
    Ok(())
}

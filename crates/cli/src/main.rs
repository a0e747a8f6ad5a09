//! Hearthmind CLI — the main entry point.
//!
//! Commands:
//! - `server`             — Run the MCP server over stdio
//! - `http`               — Run the MCP server over HTTP (and WebSocket)
//! - `ingest <path>`      — Add a source document to the corpus
//! - `consolidate-memory` — Run one archival consolidation pass
//! - `inspect-traces`     — Show recently exported spans
//!
//! Exit codes: 0 success, 1 unexpected error, 2 misconfiguration,
//! 3 backend unavailable.

use clap::{Parser, Subcommand};
use hearthmind_core::error::ErrorKind;

mod app;
mod commands;

#[derive(Parser)]
#[command(
    name = "hearthmind",
    about = "Hearthmind — self-hosted retrieval-augmented assistant platform",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server over stdio
    Server,

    /// Run the MCP server over HTTP (plus WebSocket when configured)
    Http {
        /// Override the listen address (e.g. 127.0.0.1:8700)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Ingest a document into the corpus
    Ingest {
        /// Path of the file to ingest
        path: String,
    },

    /// Run one archival consolidation pass
    ConsolidateMemory,

    /// Show recently exported trace spans
    InspectTraces {
        /// How many spans to show
        #[arg(long, default_value_t = 20)]
        last: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match hearthmind_config::AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let level = if cli.verbose { "debug" } else { &config.log_level };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = config.ensure_layout() {
        eprintln!("cannot create data root layout: {e}");
        std::process::exit(2);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Server => commands::serve::stdio(config).await,
            Commands::Http { addr } => commands::serve::http(config, addr).await,
            Commands::Ingest { path } => commands::ingest::run(config, &path).await,
            Commands::ConsolidateMemory => commands::memory::consolidate(config).await,
            Commands::InspectTraces { last } => commands::traces::inspect(config, last).await,
        }
    });

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_code(&e));
        }
    }
}

/// Map error kinds onto the documented exit codes.
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(core) = error.downcast_ref::<hearthmind_core::Error>() {
        return match core.kind() {
            ErrorKind::BackendUnavailable => 3,
            ErrorKind::InvalidInput => 2,
            _ => 1,
        };
    }
    if error
        .downcast_ref::<hearthmind_config::ConfigError>()
        .is_some()
    {
        return 2;
    }
    1
}

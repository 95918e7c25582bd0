//! Tidesync CLI
//!
//! Command-line tools for Tidesync stores.
//!
//! # Commands
//!
//! - `simulate` - Page through a synthetic remote collection
//! - `queue` - List the operation rows of a store snapshot
//! - `items` - List the cached items of a collection

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tidesync command-line tools.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store snapshot file
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Page through a synthetic remote collection
    Simulate {
        /// Collection key
        #[arg(short, long, default_value = "feed")]
        collection: String,

        /// Number of items the remote holds
        #[arg(short, long, default_value = "45")]
        total: u64,

        /// Page size
        #[arg(short, long, default_value = "20")]
        page_size: usize,

        /// Fail every n-th remote call (0 disables failures)
        #[arg(long, default_value = "0")]
        fail_every: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the operation rows of a store snapshot
    Queue {
        /// Only show rows with this status
        #[arg(long)]
        status: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the cached items of a collection
    Items {
        /// Collection key
        collection: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            collection,
            total,
            page_size,
            fail_every,
            format,
        } => {
            let options = commands::simulate::Options {
                collection,
                total,
                page_size,
                fail_every,
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::simulate::run(
                cli.store.as_deref(),
                options,
                &format,
            ))?;
        }
        Commands::Queue { status, format } => {
            let path = cli.store.ok_or("Store path required for queue")?;
            commands::queue::run(&path, status.as_deref(), &format)?;
        }
        Commands::Items { collection, format } => {
            let path = cli.store.ok_or("Store path required for items")?;
            commands::items::run(&path, &collection, &format)?;
        }
        Commands::Version => {
            println!("Tidesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

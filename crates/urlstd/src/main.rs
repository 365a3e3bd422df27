//! UrlStore command-line tool

mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use urlstoredb::{StoreConfig, UrlStore};

use crate::handler::CommandHandler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short, long, global = true, default_value = "./data")]
    data: PathBuf,

    /// Initial slots per cuckoo table
    #[arg(short, long, global = true, default_value_t = 1024)]
    capacity: usize,

    /// Number of codes the popularity tracker keeps
    #[arg(short = 'k', long, global = true, default_value_t = 10)]
    top_k: usize,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Sub-commands, one per store operation
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store a long URL and print its short code
    Shorten {
        /// Long URL; `https://` is prepended if no scheme is given
        url: String,

        /// Use this code instead of a generated one
        #[arg(long)]
        code: Option<String>,
    },
    /// Print the long URL for a code and count the access
    Resolve {
        /// Short code
        code: String,
    },
    /// List codes in ascending order
    List {
        /// First code to include
        #[arg(long)]
        from: Option<String>,

        /// Last code to include
        #[arg(long)]
        to: Option<String>,
    },
    /// Show the most accessed codes
    Popular {
        /// Maximum number of codes to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete a code
    Remove {
        /// Short code
        code: String,
    },
    /// Show store counters
    Stats,
    /// Check that the indexes agree with each other
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = StoreConfig::new(&args.data)
        .with_initial_capacity(args.capacity)
        .with_top_k(args.top_k);
    let store = Arc::new(
        UrlStore::open(config)
            .with_context(|| format!("failed to open store in {}", args.data.display()))?,
    );
    info!(data = %args.data.display(), entries = store.len(), "store ready");

    let handler = CommandHandler::new(Arc::clone(&store), args.json);
    let result = handler.handle(args.command);

    if let Err(e) = store.close() {
        warn!(error = %e, "final save failed");
    }

    let output = result?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Crawls news feeds and pairs stories covered from opposing sides.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(short, long, env = "COUNTERPOINT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Crawl all targets and sweep old articles periodically
    Run,

    /// Crawl all targets once, or a single one
    Crawl {
        /// Articles to extract per target
        #[arg(short, long)]
        limit: Option<usize>,

        /// Link of the only target to crawl
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Pair a stored article with opposing coverage
    Pair { article_id: i64 },

    /// Remove articles past the retention age, with their pairs
    Sweep,

    /// Extract, store and pair a single article page
    Ingest { url: String },

    /// Import whitelisted sites from a TOML file
    ImportSites { path: PathBuf },

    /// Import feed targets from a TOML file
    ImportTargets {
        path: PathBuf,

        /// Overwrite known targets, resetting their checkpoint (gone and auth flags are kept)
        #[arg(long)]
        replace: bool,
    },

    /// Print the latest bias pairs as JSON lines
    Pairs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

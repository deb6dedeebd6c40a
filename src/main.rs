use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod db;
mod error;
mod feed;
mod import;
mod models;
mod pairing;
mod retention;
mod services;

use app::App;
use cli::{Cli, Command};
use config::Config;
use error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!("Using database {}", config.db_path);
    let mut app = App::new(&config).await?;

    match cli.command {
        Command::Run => app.run().await?,

        Command::Crawl { limit, target } => match target {
            Some(link) => {
                let report = app.crawl_link(&link, limit).await?;
                println!(
                    "Crawled {}: {} extracted, {} stored, {} pair(s)",
                    report.target, report.extracted, report.stored, report.pairs
                );
                for id in &report.deferred {
                    println!("Pairing of article {} is blocked, retry with `pair {}`", id, id);
                }
            }
            None => {
                let pass = app.crawl_all(limit).await?;
                println!(
                    "Crawled {} target(s), {} failed: {} article(s), {} pair(s), {} pairing(s) deferred",
                    pass.targets, pass.failed, pass.articles, pass.pairs, pass.deferred
                );
            }
        },

        Command::Pair { article_id } => {
            let pairs = app.pair_article(article_id).await?;
            println!("Created {} pair(s) for article {}", pairs, article_id);
        }

        Command::Sweep => {
            let report = app.sweep().await?;
            println!(
                "Removed {} article(s) and {} pair(s)",
                report.articles_removed, report.pairs_removed
            );
        }

        Command::Ingest { url } => {
            let (id, pairs) = app.ingest_link(&url).await?;
            println!("Stored article {} with {} pair(s)", id, pairs);
        }

        Command::ImportSites { path } => {
            let saved = app.import_sites(&path).await?;
            println!("Imported {} site(s) from {:?}", saved, path);
        }

        Command::ImportTargets { path, replace } => {
            let report = app.import_targets(&path, replace).await?;
            println!(
                "Imported {} target(s) from {:?}, {} already known",
                report.saved, path, report.skipped
            );
        }

        Command::Pairs { limit } => {
            for pair in app.latest_pairs(limit).await? {
                println!("{}", serde_json::to_string(&pair)?);
            }
        }
    }

    Ok(())
}

mod cli;

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use reviews_map::{render, AppConfig, ProgressObserver, ResolutionProgress, ReviewsMap};
use tracing::debug;

use crate::cli::{CacheArgs, Cli, Commands, ResolveArgs};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Resolve(ResolveArgs::default()));

    let result = match command {
        Commands::Resolve(args) => resolve(args).await,
        Commands::Cache(args) => cache(args),
    };

    if let Err(error) = result {
        // Transport errors already carry the CSV_URL / fallback hint.
        eprintln!("Error: {error:#}");
        process::exit(1);
    }
}

async fn resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env();
    args.apply(&mut config);
    let app = ReviewsMap::initialize(config)?;

    let observer: ProgressObserver = Arc::new(|progress: ResolutionProgress| {
        debug!(
            processed = progress.processed,
            total = progress.total_rows,
            resolved = progress.resolved,
            "resolution progress"
        );
    });
    let data = app.load(Some(observer)).await?;
    let rendered = render(&data.entities, args.format.into())?;

    match &args.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn cache(args: CacheArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env();
    args.store.apply(&mut config);
    let app = ReviewsMap::initialize(config)?;
    if args.clear {
        app.clear_cache();
    }
    println!("{}", serde_json::to_string_pretty(&app.cache_health())?);
    Ok(())
}

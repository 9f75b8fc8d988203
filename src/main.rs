use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use ig_ingest::config;
use ig_ingest::db;
use ig_ingest::graph::GraphClient;
use ig_ingest::trigger::BatchTrigger;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one ingestion batch over all accounts and print the run summary as JSON"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override sync.request_budget for this run
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    budget: Option<u32>,

    /// Print the summary on a single line
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let mut settings = cfg.sync_settings();
    if let Some(budget) = args.budget {
        settings.request_budget = budget;
    }

    let graph = GraphClient::from_config(&cfg)?;
    let trigger = BatchTrigger::new(pool, Arc::new(graph), settings);

    info!("starting ingestion batch");
    let summary = trigger.run_now().await?;

    let rendered = if args.compact {
        serde_json::to_string(&summary)?
    } else {
        serde_json::to_string_pretty(&summary)?
    };
    println!("{rendered}");

    if summary.degraded {
        error!(
            store_errors = summary.store_errors,
            "batch finished with store errors"
        );
        std::process::exit(2);
    }
    Ok(())
}

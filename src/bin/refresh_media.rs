use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use ig_ingest::budget::RequestBudget;
use ig_ingest::config;
use ig_ingest::db;
use ig_ingest::graph::GraphClient;
use ig_ingest::media;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Re-fetch expired media URLs for stored posts"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Media ids whose URLs should be refreshed
    #[arg(required = true)]
    media_ids: Vec<String>,
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

    let graph = GraphClient::from_config(&cfg)?;
    let budget = RequestBudget::new(cfg.sync.request_budget);

    let mut failed = 0usize;
    let results = media::refresh_media_urls(&pool, &graph, &budget, &args.media_ids).await;
    for (media_id, result) in results {
        let line = match result {
            Ok(outcome) => serde_json::json!({ "media_id": media_id, "outcome": outcome }),
            Err(error) => {
                failed += 1;
                serde_json::json!({ "media_id": media_id, "error": error })
            }
        };
        println!("{line}");
    }
    info!(requests = budget.consumed(), failed, "media refresh finished");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

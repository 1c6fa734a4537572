use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use feed_promoter::audit::AuditLog;
use feed_promoter::config;
use feed_promoter::db;
use feed_promoter::loader;
use feed_promoter::runner::{self, RunOptions};
use feed_promoter::transform::AdTransformer;
use feed_promoter::translate::CatalogTranslator;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Promote pending feed ads into the destination system via a loader API"
)]
struct Args {
    /// Name of the configured loader to run against
    loader: String,

    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Seconds to pause between batches (overrides config)
    #[arg(long)]
    pace_seconds: Option<u64>,

    /// Batch size (overrides config)
    #[arg(long)]
    batch_size: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/feeds.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let translator = Arc::new(CatalogTranslator::from_file(Path::new(
        &cfg.translations.catalog,
    ))?);
    let active = loader::create_loader(&args.loader, &cfg)?;
    let transformer = AdTransformer::new(active.refs.clone(), translator);
    let mut audit = AuditLog::open(Path::new(&cfg.app.log_dir))?;

    let opts = RunOptions {
        batch_size: args.batch_size.unwrap_or(cfg.app.batch_size) as usize,
        pace: Duration::from_secs(args.pace_seconds.unwrap_or(cfg.app.pace_seconds)),
        seed: None,
    };

    info!(loader = %args.loader, batch_size = opts.batch_size, "starting feed promotion run");
    let summary = runner::run(&pool, active.gateway.as_ref(), &transformer, &mut audit, &opts).await?;
    info!(
        loaded_ok = summary.loaded_ok,
        errors = summary.errors,
        batches = summary.batches,
        "done"
    );
    Ok(())
}

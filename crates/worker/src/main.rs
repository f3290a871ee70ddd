//! Sync worker
//!
//! Long-running process that mirrors the billing provider into Postgres and
//! keeps the dashboard snapshot warm. Runs a full sync on boot and then
//! hourly; exchange rates refresh once a day.
//!
//! Flags:
//!   --once          run a single sync and exit
//!   --metrics-only  rebuild the dashboard snapshot from the mirror and exit
//!   --refresh-rates refresh the exchange-rate snapshot and exit

use std::env;
use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::EnvFilter;

use billmirror_pipeline::cache::RedisCache;
use billmirror_pipeline::rates::RateRefresher;
use billmirror_pipeline::store::PgStore;
use billmirror_pipeline::stripe::StripeProvider;
use billmirror_pipeline::{SyncConfig, SyncPipeline};
use billmirror_shared::db::{create_pool, run_migrations};

const SYNC_SCHEDULE: &str = "0 0 * * * *";
const RATE_REFRESH_SCHEDULE: &str = "0 30 2 * * *";
const CACHE_NAMESPACE: &str = "billmirror";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = env::args().collect();
    let config = SyncConfig::from_env()?;

    let database_url =
        env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let redis_url = env::var("REDIS_URL").map_err(|_| anyhow::anyhow!("REDIS_URL must be set"))?;

    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database ready");

    let refresher = Arc::new(RateRefresher::new(
        config.target_currency.clone(),
        config.rate_source_currencies.clone(),
        config.rates_path.clone(),
    )?);

    if args.iter().any(|a| a == "--refresh-rates") {
        refresher.refresh().await?;
        return Ok(());
    }

    let provider = StripeProvider::new(config.stripe_secret_key.clone())?;
    let cache = RedisCache::connect(&redis_url, CACHE_NAMESPACE).await?;
    let rates_path = config.rates_path.clone();
    let pipeline = Arc::new(SyncPipeline::new(
        provider,
        PgStore::new(pool),
        cache,
        config,
    ));

    if args.iter().any(|a| a == "--metrics-only") {
        pipeline.refresh_metrics(Utc::now()).await?;
        return Ok(());
    }

    // A fresh deployment has no rate snapshot yet; fetch one before the
    // first sync so amounts convert from the start
    if !rates_path.exists() {
        if let Err(e) = refresher.refresh().await {
            tracing::error!(error = %e, "Initial rate refresh failed");
        }
    }

    if args.iter().any(|a| a == "--once") {
        pipeline.run(Utc::now()).await?;
        return Ok(());
    }

    match pipeline.run(Utc::now()).await {
        Ok(report) => tracing::info!(?report, "Initial sync complete"),
        Err(e) => tracing::error!(error = %e, "Initial sync failed"),
    }

    let scheduler = JobScheduler::new().await?;

    let sync_pipeline = pipeline.clone();
    scheduler
        .add(Job::new_async(SYNC_SCHEDULE, move |_id, _sched| {
            let pipeline = sync_pipeline.clone();
            Box::pin(async move {
                if let Err(e) = pipeline.run(Utc::now()).await {
                    tracing::error!(error = %e, "Scheduled sync failed");
                }
            })
        })?)
        .await?;

    let rate_refresher = refresher.clone();
    scheduler
        .add(Job::new_async(RATE_REFRESH_SCHEDULE, move |_id, _sched| {
            let refresher = rate_refresher.clone();
            Box::pin(async move {
                if let Err(e) = refresher.refresh().await {
                    tracing::error!(error = %e, "Scheduled rate refresh failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!(
        sync = SYNC_SCHEDULE,
        rates = RATE_REFRESH_SCHEDULE,
        "Worker started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

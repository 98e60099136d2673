use anyhow::{Context, Result};
use hooks_core::clock::SystemClock;
use hooks_core::config::Settings;
use hooks_db::PgStore;
use hooks_worker::{DeliveryContext, Executor, RetrySweeper, Scheduler};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env().context("DATABASE_URL must be set")?;

    let max_connections = u32::try_from(settings.worker_concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    let db = hooks_db::connect(&settings.database_url, max_connections).await?;
    hooks_db::migrate(&db).await?;

    let store = Arc::new(PgStore::new(db));
    let executor =
        Executor::new(settings.delivery_timeout())?.with_body_limit(settings.response_body_limit);
    let ctx = DeliveryContext::new(store.clone(), store, executor, Arc::new(SystemClock));

    let sweeper = RetrySweeper::new(ctx, settings.retry_interval())
        .with_batch_size(settings.retry_batch_size)
        .with_concurrency(settings.worker_concurrency);

    let mut scheduler = Scheduler::new();
    scheduler.register(sweeper);
    scheduler.start();

    info!(
        interval_secs = settings.retry_interval_secs,
        batch_size = settings.retry_batch_size,
        concurrency = settings.worker_concurrency,
        "worker started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.stop().await;

    Ok(())
}

use log::info;
use tokio::sync::watch;

use sticker_collector::config::Config;
use sticker_collector::consumer::{self, STARTUP_ATTEMPTS, STARTUP_DELAY};
use sticker_collector::error::CollectorError;

#[tokio::main]
async fn main() -> Result<(), CollectorError> {
    pretty_env_logger::init();
    info!("Starting submission worker");

    let config = Config::from_env();
    info!("Redis: {}:{}", config.redis_host, config.redis_port);
    info!(
        "PostgreSQL: {}:{}/{}",
        config.postgres_host, config.postgres_port, config.postgres_db
    );

    // a dependency that never shows up is the one fatal condition; the
    // non-zero exit lets the supervisor restart this process
    let store = consumer::wait_for_store(&config.database_url(), STARTUP_ATTEMPTS, STARTUP_DELAY)
        .await?;
    let queue = consumer::wait_for_queue(&config.redis_url(), STARTUP_ATTEMPTS, STARTUP_DELAY)
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown_tx.send(true).ok();
        }
    });

    consumer::run(queue, store, shutdown_rx).await;

    Ok(())
}

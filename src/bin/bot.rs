use std::sync::Arc;

use log::info;
use teloxide::prelude2::*;

use sticker_collector::config::Config;
use sticker_collector::error::CollectorError;
use sticker_collector::producer::{self, BotContext};
use sticker_collector::queue::{RedisQueue, QUEUE_NAME};

#[tokio::main]
async fn main() -> Result<(), CollectorError> {
    teloxide::enable_logging!();
    info!("Starting sticker collector bot");

    let config = Config::from_env();
    info!("Redis connection: {}:{}", config.redis_host, config.redis_port);

    let bot = Bot::from_env();

    let queue = RedisQueue::connect(&config.redis_url(), QUEUE_NAME).await?;
    info!("Redis connection successful");

    let context = Arc::new(BotContext::new(queue, config.instruction_video_path.clone()));
    producer::dispatch(bot, context).await;

    Ok(())
}

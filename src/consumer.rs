use std::time::Duration;

use log::{error, info, warn};
use sea_orm::DbErr;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::envelope::SubmissionEnvelope;
use crate::error::CollectorError;
use crate::queue::{RedisQueue, SubmissionQueue, QUEUE_NAME};
use crate::store::{RecordOutcome, SubmissionStore};

/// The dequeue timeout is the loop's only suspension point; it bounds how
/// long a shutdown request can go unnoticed.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

const QUEUE_ERROR_PAUSE: Duration = Duration::from_secs(1);

pub const STARTUP_ATTEMPTS: u32 = 30;
pub const STARTUP_DELAY: Duration = Duration::from_secs(2);

/// Drain the queue until `shutdown` flips to true.
///
/// Every item is applied on its own; a malformed payload or a failed write
/// is logged and skipped, never allowed to stop the loop. An item picked up
/// before shutdown always runs to commit or rollback.
pub async fn run<Q: SubmissionQueue>(
    queue: Q,
    store: SubmissionStore,
    shutdown: watch::Receiver<bool>,
) {
    info!("Worker ready, listening on queue '{QUEUE_NAME}'");

    while !*shutdown.borrow() {
        match queue.dequeue(DEQUEUE_TIMEOUT).await {
            Ok(Some(payload)) => process_payload(&store, &payload).await,
            Ok(None) => {}
            Err(err) => {
                error!("Queue transport error: {err}");
                sleep(QUEUE_ERROR_PAUSE).await;
            }
        }
    }

    info!("Worker stopped");
}

async fn process_payload(store: &SubmissionStore, payload: &str) {
    let envelope: SubmissionEnvelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            // a malformed payload can never become valid, drop it for good
            error!("Discarding malformed payload: {err}");
            return;
        }
    };

    info!("Processing submission of '{}'", envelope.short_name);

    match store.record_submission(&envelope).await {
        Ok(RecordOutcome::Inserted { new_pack: true }) => info!(
            "Recorded new pack '{}' submitted by user {}",
            envelope.short_name, envelope.user_id
        ),
        Ok(RecordOutcome::Inserted { new_pack: false }) => info!(
            "Recorded submission of known pack '{}' by user {}",
            envelope.short_name, envelope.user_id
        ),
        Ok(RecordOutcome::AlreadyExists) => info!(
            "User {} already submitted pack '{}'",
            envelope.user_id, envelope.short_name
        ),
        Err(err) => error!(
            "Failed to record submission of '{}' by user {}: {err}",
            envelope.short_name, envelope.user_id
        ),
    }
}

/// Connect to the store with bounded retries, initializing the schema once
/// a connection goes through.
pub async fn wait_for_store(
    db_url: &str,
    attempts: u32,
    delay: Duration,
) -> Result<SubmissionStore, CollectorError> {
    for attempt in 1..=attempts {
        match connect_store(db_url).await {
            Ok(store) => {
                info!("Database connection successful, schema initialized");
                return Ok(store);
            }
            Err(err) => warn!("Waiting for database (attempt {attempt}/{attempts}): {err}"),
        }
        sleep(delay).await;
    }

    Err(CollectorError::StartupTimeout("database"))
}

/// Connect to Redis with bounded retries.
pub async fn wait_for_queue(
    redis_url: &str,
    attempts: u32,
    delay: Duration,
) -> Result<RedisQueue, CollectorError> {
    for attempt in 1..=attempts {
        match RedisQueue::connect(redis_url, QUEUE_NAME).await {
            Ok(queue) => {
                info!("Redis connection successful");
                return Ok(queue);
            }
            Err(err) => warn!("Waiting for Redis (attempt {attempt}/{attempts}): {err}"),
        }
        sleep(delay).await;
    }

    Err(CollectorError::StartupTimeout("redis"))
}

async fn connect_store(db_url: &str) -> Result<SubmissionStore, DbErr> {
    let store = SubmissionStore::connect(db_url).await?;
    store.init_schema().await?;
    Ok(store)
}

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::CollectorError;

/// Logical channel shared by the bot and the worker.
pub const QUEUE_NAME: &str = "sticker_processing";

/// Durable FIFO hand-off between the producer and the consumer.
///
/// Delivery is at-least-once: a payload popped and then lost before
/// processing completes is gone as far as the transport is concerned, so the
/// store's idempotent writes are the correctness backstop, not this trait.
#[async_trait]
pub trait SubmissionQueue: Send + Sync + 'static {
    /// Append a payload to the tail of the queue. Returns as soon as the
    /// push is acknowledged; never waits for a consumer.
    async fn enqueue(&self, payload: String) -> Result<(), CollectorError>;

    /// Pop the head of the queue, blocking up to `timeout`. A timeout is not
    /// an error; it returns `None` so the caller can poll responsively.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, CollectorError>;
}

/// Redis-backed queue using RPUSH/BLPOP on a single list.
#[derive(Clone, Debug)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
    queue_name: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, queue_name: &str) -> Result<Self, CollectorError> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        // make sure the server actually answers before handing the queue out
        redis::cmd("PING").query_async::<()>(&mut conn).await?;

        Ok(Self {
            conn,
            queue_name: queue_name.to_owned(),
        })
    }
}

#[async_trait]
impl SubmissionQueue for RedisQueue {
    async fn enqueue(&self, payload: String) -> Result<(), CollectorError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(&self.queue_name, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, CollectorError> {
        let mut conn = self.conn.clone();

        // BLPOP replies nil on timeout, which decodes to None
        let reply: Option<(String, String)> = conn
            .blpop(&self.queue_name, timeout.as_secs_f64())
            .await?;

        Ok(reply.map(|(_key, payload)| payload))
    }
}


#[cfg(test)]
mod tests {
    use super::memory::InMemoryQueue;
    use super::*;

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let queue = InMemoryQueue::default();
        queue.enqueue("first".to_owned()).await.unwrap();
        queue.enqueue("second".to_owned()).await.unwrap();

        let timeout = Duration::from_secs(1);
        assert_eq!(queue.dequeue(timeout).await.unwrap().as_deref(), Some("first"));
        assert_eq!(queue.dequeue(timeout).await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn dequeue_on_an_empty_queue_times_out_with_none() {
        let queue = InMemoryQueue::default();
        let popped = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!(popped, None);
    }
}

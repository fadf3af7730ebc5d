//! Message queue on Redis Streams.
//!
//! Each message is one stream entry with a `body` field. A consumer group
//! tracks delivery: entries read but not acknowledged sit in the group's
//! pending list, and an entry idle there longer than the visibility timeout
//! is handed to the next consumer that asks.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::{MessageQueue, ReceivedMessage};

/// Stream field holding the message body.
const BODY_FIELD: &str = "body";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vscan:jobs".to_string(),
            consumer_group: "vscan:workers".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            ..Self::default()
        }
    }
}

/// Redis Streams queue client bound to one consumer name.
pub struct RedisStreamQueue {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
}

impl RedisStreamQueue {
    /// Create a new queue client. No connection is made until first use.
    pub fn new(config: QueueConfig, consumer_name: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self {
            client,
            config,
            consumer_name: consumer_name.into(),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Start at "0" so messages sent before any worker existed are still consumed.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Take over one entry that has sat unacknowledged for longer than
    /// `visibility_timeout`.
    async fn reclaim_expired(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        let min_idle_ms = visibility_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::receive_failed(format!("XPENDING: {e}")))?;

        let Some(stale) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        // XCLAIM re-checks the idle time, so a consumer that lost the race gets nothing.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms)
            .arg(&stale.id)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::receive_failed(format!("XCLAIM: {e}")))?;

        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        info!(
            message_id = %entry.id,
            previous_consumer = %stale.consumer,
            deliveries = stale.times_delivered + 1,
            "Reclaimed message past its visibility timeout"
        );
        Ok(Some(to_message(entry, stale.times_delivered as u32 + 1)))
    }
}

fn to_message(entry: StreamId, receive_count: u32) -> ReceivedMessage {
    let body = entry.get::<String>(BODY_FIELD).unwrap_or_else(|| {
        warn!(message_id = %entry.id, "Stream entry has no body field");
        String::new()
    });
    ReceivedMessage {
        message_id: entry.id.clone(),
        receipt: entry.id,
        body,
        receive_count,
    }
}

#[async_trait]
impl MessageQueue for RedisStreamQueue {
    async fn depth(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn
            .xlen(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::depth_failed(e.to_string()))?;
        Ok(len)
    }

    async fn receive(
        &self,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        let mut conn = self.connection().await?;

        if let Some(message) = self.reclaim_expired(&mut conn, visibility_timeout).await? {
            return Ok(Some(message));
        }

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(wait.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::receive_failed(format!("XREADGROUP: {e}")))?;

        let entry = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next();

        Ok(entry.map(|entry| {
            debug!(message_id = %entry.id, "Received message from stream");
            to_message(entry, 1)
        }))
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(receipt)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::delete_failed(format!("XACK {receipt}: {e}")))?;

        // Delete the entry so depth reflects outstanding work only
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(receipt)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::delete_failed(format!("XDEL {receipt}: {e}")))?;

        debug!("Acknowledged message: {}", receipt);
        Ok(())
    }

    async fn send(&self, body: &str) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::send_failed(e.to_string()))?;

        info!("Enqueued message {}", message_id);
        Ok(message_id)
    }
}

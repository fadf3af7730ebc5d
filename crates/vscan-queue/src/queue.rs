//! The queue seam.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// A message handed out by [`MessageQueue::receive`].
///
/// The message stays invisible to other consumers until the visibility
/// timeout passed to `receive` elapses or it is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Queue-assigned id, stable across redeliveries
    pub message_id: String,
    /// Handle passed back to [`MessageQueue::delete`]
    pub receipt: String,
    /// Raw message body
    pub body: String,
    /// How many times this message has been handed out, including this one
    pub receive_count: u32,
}

/// At-least-once message queue with visibility timeouts.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Approximate number of messages in the queue, including in-flight ones.
    async fn depth(&self) -> QueueResult<u64>;

    /// Receive at most one message, waiting up to `wait` for one to arrive.
    async fn receive(
        &self,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> QueueResult<Option<ReceivedMessage>>;

    /// Acknowledge a message so it is never redelivered.
    async fn delete(&self, receipt: &str) -> QueueResult<()>;

    /// Enqueue a raw body, returning the new message id.
    async fn send(&self, body: &str) -> QueueResult<String>;
}

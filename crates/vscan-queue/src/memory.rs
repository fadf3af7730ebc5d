//! In-memory message queue.
//!
//! Mirrors the visibility-timeout contract of the Redis queue inside one
//! process. `receive` never blocks: when nothing is visible it returns
//! immediately regardless of the wait passed in.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};
use crate::queue::{MessageQueue, ReceivedMessage};

#[derive(Debug, Clone)]
struct Entry {
    body: String,
    visible_at: Option<Instant>,
    receive_count: u32,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.map_or(true, |at| at <= now)
    }
}

/// Queue held entirely in memory, ordered by send order.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: Mutex<BTreeMap<u64, Entry>>,
    next_id: AtomicU64,
    receive_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_depth: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue pre-filled with `bodies` in order.
    pub async fn with_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let queue = Self::new();
        for body in bodies {
            // Sending to a memory queue cannot fail.
            let _ = queue.send(body.as_ref()).await;
        }
        queue
    }

    /// Number of messages not yet deleted, visible or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of messages currently hidden by a visibility timeout.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| !e.is_visible(now))
            .count()
    }

    /// Whether a message with `message_id` is still queued.
    pub async fn contains(&self, message_id: &str) -> bool {
        match message_id.parse::<u64>() {
            Ok(id) => self.entries.lock().await.contains_key(&id),
            Err(_) => false,
        }
    }

    /// Make every in-flight message visible again, as if its visibility
    /// timeout had elapsed.
    pub async fn expire_visibility(&self) {
        for entry in self.entries.lock().await.values_mut() {
            entry.visible_at = None;
        }
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Make `depth` return an error.
    pub fn set_fail_depth(&self, fail: bool) {
        self.fail_depth.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` return an error.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn depth(&self) -> QueueResult<u64> {
        if self.fail_depth.load(Ordering::SeqCst) {
            return Err(QueueError::depth_failed("injected depth fault"));
        }
        Ok(self.entries.lock().await.len() as u64)
    }

    async fn receive(
        &self,
        visibility_timeout: Duration,
        _wait: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some((id, entry)) = entries.iter_mut().find(|(_, e)| e.is_visible(now)) else {
            return Ok(None);
        };

        entry.visible_at = Some(now + visibility_timeout);
        entry.receive_count += 1;

        Ok(Some(ReceivedMessage {
            message_id: id.to_string(),
            receipt: id.to_string(),
            body: entry.body.clone(),
            receive_count: entry.receive_count,
        }))
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(QueueError::delete_failed(format!("injected delete fault: {receipt}")));
        }
        let id: u64 = receipt
            .parse()
            .map_err(|_| QueueError::delete_failed(format!("unknown receipt: {receipt}")))?;
        // Deleting an already-deleted message is a no-op, as with XACK.
        self.entries.lock().await.remove(&id);
        Ok(())
    }

    async fn send(&self, body: &str) -> QueueResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.lock().await.insert(
            id,
            Entry {
                body: body.to_string(),
                visible_at: None,
                receive_count: 0,
            },
        );
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    const VISIBILITY: Duration = Duration::from_secs(600);
    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_receive_hides_message_until_deleted() {
        let queue = MemoryQueue::with_bodies(["a", "b"]).await;
        assert_eq!(assert_ok!(queue.depth().await), 2);

        let first = queue.receive(VISIBILITY, WAIT).await.unwrap().unwrap();
        assert_eq!(first.body, "a");
        assert_eq!(first.receive_count, 1);
        assert_eq!(queue.in_flight().await, 1);

        let second = queue.receive(VISIBILITY, WAIT).await.unwrap().unwrap();
        assert_eq!(second.body, "b");
        assert!(queue.receive(VISIBILITY, WAIT).await.unwrap().is_none());
        assert_eq!(queue.receive_calls(), 3);

        assert_ok!(queue.delete(&first.receipt).await);
        assert!(!queue.contains(&first.message_id).await);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_visibility_redelivers() {
        let queue = MemoryQueue::with_bodies(["a"]).await;
        let first = queue.receive(VISIBILITY, WAIT).await.unwrap().unwrap();

        queue.expire_visibility().await;
        let again = queue.receive(VISIBILITY, WAIT).await.unwrap().unwrap();
        assert_eq!(again.message_id, first.message_id);
        assert_eq!(again.receive_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_elapses() {
        let queue = MemoryQueue::with_bodies(["a"]).await;
        queue.receive(Duration::from_secs(10), WAIT).await.unwrap().unwrap();
        assert!(queue.receive(Duration::from_secs(10), WAIT).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(queue.receive(Duration::from_secs(10), WAIT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let queue = MemoryQueue::with_bodies(["a"]).await;
        queue.set_fail_depth(true);
        assert!(matches!(queue.depth().await, Err(QueueError::DepthFailed(_))));

        queue.set_fail_deletes(true);
        let message = queue.receive(VISIBILITY, WAIT).await.unwrap().unwrap();
        assert!(queue.delete(&message.receipt).await.is_err());
        assert!(queue.contains(&message.message_id).await);
        assert_eq!(queue.delete_calls(), 1);
    }
}

//! Queue publishing seam and the in-memory double used by tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use super::errors::MessagingError;

/// Publishing side of the push-delivery queue.
///
/// The provider owns delivery, redelivery with backoff, and dead-lettering;
/// this crate only ever publishes.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish one message, returning the provider's message id.
    async fn publish(&self, queue_name: &str, payload: &Value) -> Result<i64, MessagingError>;
}

/// In-memory queue for tests and local runs. Preserves publish order per
/// queue and assigns monotonically increasing message ids.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    inner: Mutex<InMemoryQueueInner>,
}

#[derive(Debug, Default)]
struct InMemoryQueueInner {
    queues: HashMap<String, Vec<Value>>,
    next_id: i64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently sitting on a queue
    pub fn len(&self, queue_name: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue_name: &str) -> bool {
        self.len(queue_name) == 0
    }

    /// Drain all messages from a queue in publish order
    pub fn drain(&self, queue_name: &str) -> Vec<Value> {
        self.inner
            .lock()
            .queues
            .remove(queue_name)
            .unwrap_or_default()
    }

    /// Peek without consuming
    pub fn messages(&self, queue_name: &str) -> Vec<Value> {
        self.inner
            .lock()
            .queues
            .get(queue_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueuePublisher for InMemoryQueue {
    async fn publish(&self, queue_name: &str, payload: &Value) -> Result<i64, MessagingError> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .push(payload.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let queue = InMemoryQueue::new();
        queue.publish("work_items", &json!({"n": 1})).await.unwrap();
        queue.publish("work_items", &json!({"n": 2})).await.unwrap();
        queue.publish("signals", &json!({"n": 3})).await.unwrap();

        assert_eq!(queue.len("work_items"), 2);
        assert_eq!(queue.len("signals"), 1);

        let drained = queue.drain("work_items");
        assert_eq!(drained[0]["n"], 1);
        assert_eq!(drained[1]["n"], 2);
        assert!(queue.is_empty("work_items"));
    }

    #[tokio::test]
    async fn test_ids_monotonic_across_queues() {
        let queue = InMemoryQueue::new();
        let a = queue.publish("q1", &json!({})).await.unwrap();
        let b = queue.publish("q2", &json!({})).await.unwrap();
        assert!(b > a);
    }
}

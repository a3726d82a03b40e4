//! pgmq-backed queue publisher.
//!
//! Publishes through the pgmq SQL functions directly over the shared sqlx
//! pool; the push-delivery loop on the consuming side is owned by the queue
//! infrastructure, not this crate.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, error};

use super::errors::MessagingError;
use super::queue::QueuePublisher;

/// Queue publisher over pgmq.
#[derive(Debug, Clone)]
pub struct PgmqPublisher {
    pool: PgPool,
}

impl PgmqPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the queue if it does not already exist. Idempotent.
    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        sqlx::query("SELECT pgmq.create($1::TEXT)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(queue_name = %queue_name, error = %e, "Failed to create queue");
                MessagingError::queue_operation(queue_name, "create", e.to_string())
            })?;
        debug!(queue_name = %queue_name, "Queue ensured");
        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for PgmqPublisher {
    async fn publish(&self, queue_name: &str, payload: &Value) -> Result<i64, MessagingError> {
        let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1::TEXT, $2::JSONB)")
            .bind(queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(queue_name = %queue_name, error = %e, "Failed to publish message");
                MessagingError::queue_operation(queue_name, "send", e.to_string())
            })?;

        debug!(queue_name = %queue_name, msg_id, "Message published");
        Ok(msg_id)
    }
}

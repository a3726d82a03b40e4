//! # Messaging Layer
//!
//! Queue payloads and publishing for the push-delivery queues that carry
//! completion signals to the orchestrator and work items to the worker
//! fleet. Delivery is at-least-once; every consumer in this crate is
//! written to be idempotent under redelivery.

pub mod errors;
pub mod message;
pub mod pgmq_publisher;
pub mod queue;

pub use errors::MessagingError;
pub use message::{CompletionSignal, WorkItem};
pub use pgmq_publisher::PgmqPublisher;
pub use queue::{InMemoryQueue, QueuePublisher};

//! # Event System
//!
//! Broadcast publisher for lifecycle events and data-quality alerts. Event
//! names live in [`crate::constants::events`]; subscribers (alert shippers,
//! test assertions) attach via [`EventPublisher::subscribe`].

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};

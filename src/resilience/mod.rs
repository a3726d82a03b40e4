//! # Resilience Patterns
//!
//! Per-entity circuit breaking for the prediction dispatch path. Repeated
//! transient failures for one entity trip its breaker, excluding it from
//! batch builds for an exponentially growing cooldown window instead of
//! letting it burn redelivery attempts forever.

mod entity_breaker;

pub use entity_breaker::{BreakerConfig, BreakerState, EntityBreakerRegistry};

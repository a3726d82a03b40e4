//! # Prediction Worker
//!
//! Consumes one work item at a time from the push-delivery queue: staleness
//! short-circuit, feature load, quality gating, scoring, and the staged
//! write. Stateless and horizontally scaled; every path through the worker
//! is safe under redelivery because the staged write dedups on
//! `(entity, date, system)` and everything before it is read-only.

pub mod prediction_worker;

pub use prediction_worker::{PredictionWorker, WorkOutcome};

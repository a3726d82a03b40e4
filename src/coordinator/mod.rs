//! # Prediction Coordinator
//!
//! Builds one work batch per `(date, system)`, dispatches it over the
//! push-delivery queue at a deliberately steady rate, and consolidates
//! staged worker output into the canonical store exactly once.

pub mod batch_coordinator;
pub mod consolidator;

pub use batch_coordinator::{BatchCoordinator, DispatchResult};
pub use consolidator::{ConsolidationResult, StagingConsolidator};

//! # Stage Orchestration
//!
//! Event-driven decision logic for when stage N+1 may start. Every producer
//! completion signal re-evaluates the durable completion record; readiness
//! and trigger confirmation are two separate transactions with the
//! downstream invocation in between, so a crash or rejection between them
//! leaves a retryable `ReadyPending` record instead of a permanently
//! orphaned "done" marker.

pub mod invoker;
pub mod stage_orchestrator;

pub use invoker::{HttpStageInvoker, RecordingInvoker, StageInvoker};
pub use stage_orchestrator::{StageOrchestrator, TriggerOutcome};

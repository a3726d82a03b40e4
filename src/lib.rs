#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Propcast Core
//!
//! Rust core of a sports prediction pipeline: multi-stage ingestion
//! orchestration plus a coordinator/worker system that batches entities,
//! dispatches prediction work over a push-delivery queue, and consolidates
//! results exactly-once into a canonical store.
//!
//! ## Architecture
//!
//! The pipeline runs in strict dependency order (raw ingestion → derived
//! analytics → feature materialization → predictions) with no central
//! scheduler holding long-lived state. Two pieces carry the correctness
//! burden:
//!
//! - [`orchestration`] — the cross-stage trigger state machine. Readiness
//!   and trigger confirmation are two separate transactions with the
//!   downstream invocation in between, so a failure between them leaves a
//!   retryable record instead of a committed lie.
//! - [`coordinator`] — batch build, rate-limited dispatch, and the single
//!   consolidation point where staged worker output becomes canonical with
//!   exactly-once effect under at-least-once delivery.
//!
//! Around them: [`worker`] (stale-message short-circuit, quality gating,
//! scoring, staged writes), [`quality`] (usability and contamination
//! screening), [`resilience`] (per-entity circuit breakers), and [`store`]
//! (the transactional seams to the durable stores, with in-memory and
//! Postgres backends).
//!
//! ## Module Organization
//!
//! - [`models`] - Domain types: completion records, batches, predictions
//! - [`orchestration`] - Stage trigger state machine
//! - [`coordinator`] - Batch coordinator and staging consolidator
//! - [`worker`] - Work-item processing
//! - [`quality`] - Feature quality gate
//! - [`resilience`] - Per-entity circuit breakers
//! - [`scoring`] - Versioned scoring artifacts
//! - [`store`] - Durable store contracts and backends
//! - [`messaging`] - Queue payloads and publishers
//! - [`web`] - Axum API: control, push delivery, health
//! - [`config`] - YAML configuration with environment overlays
//! - [`events`] - Lifecycle and alert event bus
//! - [`error`] - Structured error handling

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod quality;
pub mod resilience;
pub mod scoring;
pub mod store;
pub mod web;
pub mod worker;

pub use config::{ConfigManager, PropcastConfig, SystemQualityConfig};
pub use constants::{events as system_events, system, PipelineStage};
pub use coordinator::{BatchCoordinator, StagingConsolidator};
pub use error::{ErrorClass, PropcastError, Result};
pub use events::EventPublisher;
pub use messaging::{CompletionSignal, WorkItem};
pub use models::{
    BatchStatus, FeatureSource, FeatureVector, PredictionRecord, Recommendation, RunMode,
    SampleQuality, StageCompletion, StagedPrediction, TriggerState, WorkBatch,
};
pub use orchestration::{StageInvoker, StageOrchestrator, TriggerOutcome};
pub use quality::{QualityGate, QualityVerdict, UnusableReason};
pub use resilience::EntityBreakerRegistry;
pub use scoring::{ModelArtifact, Scorer};
pub use worker::{PredictionWorker, WorkOutcome};

//! # Store Contracts
//!
//! The durable stores this core depends on, expressed as async trait seams.
//! Only two operations in the whole system need transactional discipline:
//! the completion record's read-modify-write and the canonical store's
//! active-record flip. Both are expressed as single operations *inside* the
//! store implementations, never as separate read-then-write calls from
//! application code.
//!
//! The in-memory backends provide the full contract under a single lock and
//! power the test suite; the Postgres backends carry the same semantics via
//! row-level transactions.

pub mod memory;
pub mod postgres;

pub use memory::{
    InMemoryBatchStore, InMemoryCanonicalStore, InMemoryCompletionStore, InMemoryEntityUniverse,
    InMemoryFeatureStore, InMemoryLineSource, InMemoryLogSink, InMemoryStagingStore,
};
pub use postgres::{
    PgBatchStore, PgCanonicalStore, PgCompletionStore, PgLogSink, PgStagingStore,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::constants::PipelineStage;
use crate::error::Result;
use crate::models::{
    BatchStatus, ExecutionLog, FeatureVector, PredictionRecord, RunMode, StageCompletion,
    WorkBatch,
};

/// Durable completion tracking for `(stage, date)` keys.
///
/// Every method is one transaction against one record.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Upsert the record for `(stage, date)`, add `producer_id` to the
    /// completed set, and promote `Waiting` to `ReadyPending` when the
    /// required set is satisfied. Returns the post-transaction record.
    ///
    /// This transaction decides; it never records the downstream outcome.
    async fn record_producer(
        &self,
        stage: PipelineStage,
        date: NaiveDate,
        producer_id: &str,
        mode: RunMode,
        required_producers: BTreeSet<String>,
    ) -> Result<StageCompletion>;

    /// Second-phase transaction: record that the downstream invocation
    /// returned success. Idempotent on already-Triggered records.
    async fn mark_triggered(
        &self,
        stage: PipelineStage,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<StageCompletion>;

    /// Count one failed invocation attempt; returns the running total.
    async fn note_trigger_attempt(&self, stage: PipelineStage, date: NaiveDate) -> Result<u32>;

    /// Advance `ReadyPending` to `TriggerFailed` after attempts exhaust.
    async fn mark_trigger_failed(&self, stage: PipelineStage, date: NaiveDate) -> Result<()>;

    /// Re-arm a `TriggerFailed` record back to `ReadyPending` so a later
    /// real signal retries the invocation. Returns true if re-armed.
    async fn rearm(&self, stage: PipelineStage, date: NaiveDate) -> Result<bool>;

    async fn get(&self, stage: PipelineStage, date: NaiveDate) -> Result<Option<StageCompletion>>;

    /// Connectivity probe for deep health checks
    async fn ping(&self) -> Result<()>;
}

/// Durable batch state. The coordinator holds no batch state in memory
/// that must survive a restart; it all lives here.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn create(&self, batch: &WorkBatch) -> Result<()>;

    async fn get(&self, batch_id: Uuid) -> Result<Option<WorkBatch>>;

    async fn update_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<()>;

    /// Persist dispatch progress so a remainder retry resumes at the right
    /// offset after a partial publish failure.
    async fn record_dispatch_progress(&self, batch_id: Uuid, dispatched_count: usize)
        -> Result<()>;

    async fn record_result_count(&self, batch_id: Uuid, result_count: usize) -> Result<()>;

    /// Batches currently in flight (pending, dispatching, awaiting results)
    async fn in_flight(&self) -> Result<Vec<WorkBatch>>;
}

/// Staging area for worker output.
///
/// Writes are keyed `(entity, date, system)` ignoring attempt; a later
/// `created_at` overwrites, an earlier one is dropped. That keying is what
/// makes redelivered work items harmless.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn put(&self, staged: crate::models::StagedPrediction) -> Result<()>;

    /// All staged rows for a `(date, system)` pair
    async fn staged_for(
        &self,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Vec<crate::models::StagedPrediction>>;
}

/// Outcome of one canonical merge call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Records newly activated by this call
    pub activated: usize,
    /// Prior active records superseded by this call
    pub superseded: usize,
    /// Records already active with the same id; nothing changed
    pub unchanged: usize,
}

/// Canonical prediction store.
///
/// `merge_active` is the single point where predictions become canonical:
/// exactly-once effect under at-least-once invocation. Calling it twice
/// with the same input changes nothing the second time.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Atomically activate each record, superseding the prior active record
    /// for its `(entity, date, system)` key if one exists with a different
    /// id. Must only be called by the staging consolidator.
    async fn merge_active(&self, records: Vec<PredictionRecord>) -> Result<MergeOutcome>;

    /// The active record for a key, if any
    async fn active(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Option<PredictionRecord>>;

    /// Every record for a key including superseded ones, for audit
    async fn all_for(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Vec<PredictionRecord>>;

    /// Connectivity probe for deep health checks
    async fn ping(&self) -> Result<()>;
}

/// Read-only feature cache contract. This core never writes feature data.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn get_features(
        &self,
        entity_id: &str,
        date: NaiveDate,
    ) -> Result<Option<FeatureVector>>;
}

/// External odds/line source, read at batch build time
#[async_trait]
pub trait LineSource: Send + Sync {
    async fn latest_line(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Option<f64>>;
}

/// The entity universe for a date: every participant in scheduled events
#[async_trait]
pub trait EntityUniverse: Send + Sync {
    async fn entities_for(&self, date: NaiveDate) -> Result<Vec<String>>;
}

/// Sink for worker execution logs.
///
/// Implementations must reject rows whose repeated fields are null rather
/// than empty; the warehouse load fails on nulls hours later otherwise.
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn write(&self, log: ExecutionLog) -> Result<()>;
}

/// Shared repeated-field validation for log sinks
pub(crate) fn validate_log_row(log: &ExecutionLog) -> Result<()> {
    let nulls = log.null_repeated_fields();
    if nulls.is_empty() {
        Ok(())
    } else {
        Err(crate::error::PropcastError::validation(format!(
            "execution log {} has null repeated fields: {}",
            log.log_id,
            nulls.join(", ")
        )))
    }
}

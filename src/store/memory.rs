//! In-memory store backends.
//!
//! Each backend honors the same transactional contract as its Postgres
//! counterpart by holding a single lock across the whole read-modify-write.
//! These power the test suite and local runs; they are not durable.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

use super::{
    validate_log_row, BatchStore, CanonicalStore, CompletionStore, EntityUniverse,
    ExecutionLogSink, FeatureStore, LineSource, MergeOutcome, StagingStore,
};
use crate::constants::PipelineStage;
use crate::error::{PropcastError, Result};
use crate::models::{
    BatchStatus, ExecutionLog, FeatureVector, PredictionRecord, RunMode, StageCompletion,
    StagedPrediction, TriggerState, WorkBatch,
};

type CompletionKey = (PipelineStage, NaiveDate);
type PredictionKey = (String, NaiveDate, String);

/// In-memory completion tracker
#[derive(Debug, Default)]
pub struct InMemoryCompletionStore {
    records: Mutex<HashMap<CompletionKey, StageCompletion>>,
}

impl InMemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletionStore for InMemoryCompletionStore {
    async fn record_producer(
        &self,
        stage: PipelineStage,
        date: NaiveDate,
        producer_id: &str,
        mode: RunMode,
        required_producers: BTreeSet<String>,
    ) -> Result<StageCompletion> {
        let mut records = self.records.lock();
        let record = records
            .entry((stage, date))
            .or_insert_with(|| StageCompletion::new(stage, date, mode, required_producers.clone()));

        // While still waiting, later signals may carry a corrected mode or
        // required set; once the trigger path has started the policy is fixed
        if record.trigger_state == TriggerState::Waiting {
            record.mode = mode;
            record.required_producers = required_producers;
        }

        record.record_producer(producer_id);
        record.promote_if_ready();
        Ok(record.clone())
    }

    async fn mark_triggered(
        &self,
        stage: PipelineStage,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<StageCompletion> {
        let mut records = self.records.lock();
        let record = records.get_mut(&(stage, date)).ok_or_else(|| {
            PropcastError::store("mark_triggered", format!("no record for {stage} {date}"))
        })?;
        record
            .mark_triggered(at)
            .map_err(|e| PropcastError::store("mark_triggered", e.to_string()))?;
        Ok(record.clone())
    }

    async fn note_trigger_attempt(&self, stage: PipelineStage, date: NaiveDate) -> Result<u32> {
        let mut records = self.records.lock();
        let record = records.get_mut(&(stage, date)).ok_or_else(|| {
            PropcastError::store(
                "note_trigger_attempt",
                format!("no record for {stage} {date}"),
            )
        })?;
        Ok(record.note_trigger_attempt())
    }

    async fn mark_trigger_failed(&self, stage: PipelineStage, date: NaiveDate) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(&(stage, date)).ok_or_else(|| {
            PropcastError::store(
                "mark_trigger_failed",
                format!("no record for {stage} {date}"),
            )
        })?;
        record
            .mark_trigger_failed()
            .map_err(|e| PropcastError::store("mark_trigger_failed", e.to_string()))
    }

    async fn rearm(&self, stage: PipelineStage, date: NaiveDate) -> Result<bool> {
        let mut records = self.records.lock();
        Ok(records
            .get_mut(&(stage, date))
            .map(StageCompletion::rearm)
            .unwrap_or(false))
    }

    async fn get(&self, stage: PipelineStage, date: NaiveDate) -> Result<Option<StageCompletion>> {
        Ok(self.records.lock().get(&(stage, date)).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory batch store
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    batches: Mutex<HashMap<Uuid, WorkBatch>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_batch<T>(
        &self,
        batch_id: Uuid,
        operation: &str,
        f: impl FnOnce(&mut WorkBatch) -> T,
    ) -> Result<T> {
        let mut batches = self.batches.lock();
        let batch = batches.get_mut(&batch_id).ok_or_else(|| {
            PropcastError::store(operation, format!("no batch {batch_id}"))
        })?;
        let result = f(batch);
        batch.updated_at = Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn create(&self, batch: &WorkBatch) -> Result<()> {
        self.batches.lock().insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn get(&self, batch_id: Uuid) -> Result<Option<WorkBatch>> {
        Ok(self.batches.lock().get(&batch_id).cloned())
    }

    async fn update_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<()> {
        self.with_batch(batch_id, "update_status", |batch| batch.status = status)
    }

    async fn record_dispatch_progress(
        &self,
        batch_id: Uuid,
        dispatched_count: usize,
    ) -> Result<()> {
        self.with_batch(batch_id, "record_dispatch_progress", |batch| {
            batch.dispatched_count = dispatched_count;
        })
    }

    async fn record_result_count(&self, batch_id: Uuid, result_count: usize) -> Result<()> {
        self.with_batch(batch_id, "record_result_count", |batch| {
            batch.result_count = result_count;
        })
    }

    async fn in_flight(&self) -> Result<Vec<WorkBatch>> {
        Ok(self
            .batches
            .lock()
            .values()
            .filter(|batch| batch.status.is_in_flight())
            .cloned()
            .collect())
    }
}

/// In-memory staging area with last-write-wins dedup
#[derive(Debug, Default)]
pub struct InMemoryStagingStore {
    staged: Mutex<HashMap<PredictionKey, StagedPrediction>>,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total staged rows, across all keys
    pub fn len(&self) -> usize {
        self.staged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn put(&self, staged: StagedPrediction) -> Result<()> {
        let mut rows = self.staged.lock();
        let key = staged.dedup_key();
        match rows.get(&key) {
            Some(existing) if existing.created_at > staged.created_at => {
                // Older write loses; nothing to do
            }
            _ => {
                rows.insert(key, staged);
            }
        }
        Ok(())
    }

    async fn staged_for(
        &self,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Vec<StagedPrediction>> {
        Ok(self
            .staged
            .lock()
            .values()
            .filter(|row| row.date == date && row.system_id == system_id)
            .cloned()
            .collect())
    }
}

/// In-memory canonical store
#[derive(Debug, Default)]
pub struct InMemoryCanonicalStore {
    records: Mutex<HashMap<PredictionKey, Vec<PredictionRecord>>>,
}

impl InMemoryCanonicalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CanonicalStore for InMemoryCanonicalStore {
    async fn merge_active(&self, records: Vec<PredictionRecord>) -> Result<MergeOutcome> {
        let mut store = self.records.lock();
        let mut outcome = MergeOutcome {
            activated: 0,
            superseded: 0,
            unchanged: 0,
        };

        for incoming in records {
            let key = incoming.dedup_key();
            let history = store.entry(key).or_default();

            // A record id merges at most once; re-merging a known id (active
            // or already superseded) is a no-op, which is what makes
            // re-running consolidation safe in any interleaving
            let known: HashSet<Uuid> = history.iter().map(|r| r.record_id).collect();
            if known.contains(&incoming.record_id) {
                outcome.unchanged += 1;
                continue;
            }

            if let Some(previous) = history.iter_mut().find(|r| r.is_active) {
                previous.is_active = false;
                previous.superseded_by = Some(incoming.record_id);
                outcome.superseded += 1;
            }

            let mut activated = incoming;
            activated.is_active = true;
            activated.superseded_by = None;
            history.push(activated);
            outcome.activated += 1;
        }

        Ok(outcome)
    }

    async fn active(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Option<PredictionRecord>> {
        let key = (entity_id.to_string(), date, system_id.to_string());
        Ok(self
            .records
            .lock()
            .get(&key)
            .and_then(|history| history.iter().find(|r| r.is_active).cloned()))
    }

    async fn all_for(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Vec<PredictionRecord>> {
        let key = (entity_id.to_string(), date, system_id.to_string());
        Ok(self.records.lock().get(&key).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory feature store with configurable read failures, for tests
#[derive(Debug, Default)]
pub struct InMemoryFeatureStore {
    features: Mutex<HashMap<(String, NaiveDate), FeatureVector>>,
    failing_entities: Mutex<HashSet<String>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, features: FeatureVector) {
        self.features
            .lock()
            .insert((features.entity_id.clone(), features.date), features);
    }

    /// Make reads for one entity fail transiently until cleared
    pub fn fail_reads_for(&self, entity_id: &str) {
        self.failing_entities.lock().insert(entity_id.to_string());
    }

    pub fn clear_failure(&self, entity_id: &str) {
        self.failing_entities.lock().remove(entity_id);
    }
}

#[async_trait]
impl FeatureStore for InMemoryFeatureStore {
    async fn get_features(
        &self,
        entity_id: &str,
        date: NaiveDate,
    ) -> Result<Option<FeatureVector>> {
        if self.failing_entities.lock().contains(entity_id) {
            return Err(PropcastError::upstream_unavailable(format!(
                "feature store read failed for {entity_id}"
            )));
        }
        Ok(self
            .features
            .lock()
            .get(&(entity_id.to_string(), date))
            .cloned())
    }
}

/// In-memory line source
#[derive(Debug, Default)]
pub struct InMemoryLineSource {
    lines: Mutex<HashMap<(String, NaiveDate, String), f64>>,
}

impl InMemoryLineSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_line(&self, entity_id: &str, date: NaiveDate, system_id: &str, line: f64) {
        self.lines.lock().insert(
            (entity_id.to_string(), date, system_id.to_string()),
            line,
        );
    }
}

#[async_trait]
impl LineSource for InMemoryLineSource {
    async fn latest_line(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Option<f64>> {
        Ok(self
            .lines
            .lock()
            .get(&(entity_id.to_string(), date, system_id.to_string()))
            .copied())
    }
}

/// In-memory entity universe
#[derive(Debug, Default)]
pub struct InMemoryEntityUniverse {
    entities: Mutex<HashMap<NaiveDate, Vec<String>>>,
}

impl InMemoryEntityUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entities(&self, date: NaiveDate, entities: Vec<String>) {
        self.entities.lock().insert(date, entities);
    }
}

#[async_trait]
impl EntityUniverse for InMemoryEntityUniverse {
    async fn entities_for(&self, date: NaiveDate) -> Result<Vec<String>> {
        Ok(self.entities.lock().get(&date).cloned().unwrap_or_default())
    }
}

/// In-memory execution log sink with the repeated-field null rejection the
/// warehouse sink enforces
#[derive(Debug, Default)]
pub struct InMemoryLogSink {
    logs: Mutex<Vec<ExecutionLog>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<ExecutionLog> {
        self.logs.lock().clone()
    }
}

#[async_trait]
impl ExecutionLogSink for InMemoryLogSink {
    async fn write(&self, log: ExecutionLog) -> Result<()> {
        validate_log_row(&log)?;
        self.logs.lock().push(log);
        Ok(())
    }
}

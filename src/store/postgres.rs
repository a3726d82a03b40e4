//! Postgres store backends.
//!
//! Runtime-checked sqlx queries over the schema in `migrations/`. The two
//! operations needing transactional discipline (completion record updates
//! and the active-record flip) take a row lock with `FOR UPDATE` and commit
//! the whole read-modify-write as one transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    validate_log_row, BatchStore, CanonicalStore, CompletionStore, ExecutionLogSink, MergeOutcome,
    StagingStore,
};
use crate::constants::PipelineStage;
use crate::error::{PropcastError, Result};
use crate::models::{
    BatchStatus, ExecutionLog, PredictionRecord, Recommendation, RunMode, StageCompletion,
    StagedPrediction, TriggerState, WorkBatch,
};

fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|e: String| PropcastError::store(what, e))
}

/// Postgres-backed completion tracker
#[derive(Debug, Clone)]
pub struct PgCompletionStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CompletionRow {
    stage: String,
    date: NaiveDate,
    mode: String,
    required_producers: serde_json::Value,
    completed_producers: serde_json::Value,
    trigger_state: String,
    trigger_attempts: i32,
    triggered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CompletionRow {
    fn into_model(self) -> Result<StageCompletion> {
        Ok(StageCompletion {
            stage: parse_enum(&self.stage, "stage_completions.stage")?,
            date: self.date,
            mode: parse_enum(&self.mode, "stage_completions.mode")?,
            required_producers: serde_json::from_value(self.required_producers)
                .map_err(|e| PropcastError::store("stage_completions", e.to_string()))?,
            completed_producers: serde_json::from_value(self.completed_producers)
                .map_err(|e| PropcastError::store("stage_completions", e.to_string()))?,
            trigger_state: parse_enum(&self.trigger_state, "stage_completions.trigger_state")?,
            trigger_attempts: self.trigger_attempts as u32,
            triggered_at: self.triggered_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PgCompletionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the record row for update, creating it first if absent.
    async fn lock_record(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stage: PipelineStage,
        date: NaiveDate,
    ) -> Result<Option<StageCompletion>> {
        let row: Option<CompletionRow> = sqlx::query_as(
            r#"
            SELECT stage, date, mode, required_producers, completed_producers,
                   trigger_state, trigger_attempts, triggered_at, created_at, updated_at
            FROM stage_completions
            WHERE stage = $1 AND date = $2
            FOR UPDATE
            "#,
        )
        .bind(stage.to_string())
        .bind(date)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(CompletionRow::into_model).transpose()
    }

    async fn persist(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &StageCompletion,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stage_completions
                (stage, date, mode, required_producers, completed_producers,
                 trigger_state, trigger_attempts, triggered_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (stage, date) DO UPDATE SET
                mode = EXCLUDED.mode,
                required_producers = EXCLUDED.required_producers,
                completed_producers = EXCLUDED.completed_producers,
                trigger_state = EXCLUDED.trigger_state,
                trigger_attempts = EXCLUDED.trigger_attempts,
                triggered_at = EXCLUDED.triggered_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.stage.to_string())
        .bind(record.date)
        .bind(record.mode.to_string())
        .bind(serde_json::to_value(&record.required_producers).unwrap_or_default())
        .bind(serde_json::to_value(&record.completed_producers).unwrap_or_default())
        .bind(record.trigger_state.to_string())
        .bind(record.trigger_attempts as i32)
        .bind(record.triggered_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CompletionStore for PgCompletionStore {
    #[instrument(skip(self, required_producers), fields(stage = %stage, date = %date))]
    async fn record_producer(
        &self,
        stage: PipelineStage,
        date: NaiveDate,
        producer_id: &str,
        mode: RunMode,
        required_producers: BTreeSet<String>,
    ) -> Result<StageCompletion> {
        let mut tx = self.pool.begin().await?;

        let mut record = match self.lock_record(&mut tx, stage, date).await? {
            Some(existing) => existing,
            None => StageCompletion::new(stage, date, mode, required_producers.clone()),
        };

        // While still waiting, later signals may carry a corrected policy
        if record.trigger_state == TriggerState::Waiting {
            record.mode = mode;
            record.required_producers = required_producers;
        }
        record.record_producer(producer_id);
        record.promote_if_ready();

        self.persist(&mut tx, &record).await?;
        tx.commit().await?;

        debug!(
            producer_id = %producer_id,
            trigger_state = %record.trigger_state,
            completed = record.completed_producers.len(),
            required = record.required_producers.len(),
            "Producer completion recorded"
        );
        Ok(record)
    }

    async fn mark_triggered(
        &self,
        stage: PipelineStage,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<StageCompletion> {
        let mut tx = self.pool.begin().await?;
        let mut record = self
            .lock_record(&mut tx, stage, date)
            .await?
            .ok_or_else(|| {
                PropcastError::store("mark_triggered", format!("no record for {stage} {date}"))
            })?;
        record
            .mark_triggered(at)
            .map_err(|e| PropcastError::store("mark_triggered", e.to_string()))?;
        self.persist(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn note_trigger_attempt(&self, stage: PipelineStage, date: NaiveDate) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        let mut record = self
            .lock_record(&mut tx, stage, date)
            .await?
            .ok_or_else(|| {
                PropcastError::store(
                    "note_trigger_attempt",
                    format!("no record for {stage} {date}"),
                )
            })?;
        let attempts = record.note_trigger_attempt();
        self.persist(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(attempts)
    }

    async fn mark_trigger_failed(&self, stage: PipelineStage, date: NaiveDate) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut record = self
            .lock_record(&mut tx, stage, date)
            .await?
            .ok_or_else(|| {
                PropcastError::store(
                    "mark_trigger_failed",
                    format!("no record for {stage} {date}"),
                )
            })?;
        record
            .mark_trigger_failed()
            .map_err(|e| PropcastError::store("mark_trigger_failed", e.to_string()))?;
        self.persist(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rearm(&self, stage: PipelineStage, date: NaiveDate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let rearmed = match self.lock_record(&mut tx, stage, date).await? {
            Some(mut record) => {
                let changed = record.rearm();
                if changed {
                    self.persist(&mut tx, &record).await?;
                }
                changed
            }
            None => false,
        };
        tx.commit().await?;
        Ok(rearmed)
    }

    async fn get(&self, stage: PipelineStage, date: NaiveDate) -> Result<Option<StageCompletion>> {
        let row: Option<CompletionRow> = sqlx::query_as(
            r#"
            SELECT stage, date, mode, required_producers, completed_producers,
                   trigger_state, trigger_attempts, triggered_at, created_at, updated_at
            FROM stage_completions
            WHERE stage = $1 AND date = $2
            "#,
        )
        .bind(stage.to_string())
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CompletionRow::into_model).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Postgres-backed batch store
#[derive(Debug, Clone)]
pub struct PgBatchStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    batch_id: Uuid,
    date: NaiveDate,
    system_id: String,
    mode: String,
    entity_ids: serde_json::Value,
    reference_lines: serde_json::Value,
    status: String,
    dispatched_count: i32,
    result_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BatchRow {
    fn into_model(self) -> Result<WorkBatch> {
        Ok(WorkBatch {
            batch_id: self.batch_id,
            date: self.date,
            system_id: self.system_id,
            mode: parse_enum(&self.mode, "work_batches.mode")?,
            entity_ids: serde_json::from_value(self.entity_ids)
                .map_err(|e| PropcastError::store("work_batches", e.to_string()))?,
            reference_lines: serde_json::from_value(self.reference_lines)
                .map_err(|e| PropcastError::store("work_batches", e.to_string()))?,
            status: parse_enum(&self.status, "work_batches.status")?,
            dispatched_count: self.dispatched_count as usize,
            result_count: self.result_count as usize,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PgBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BATCH_COLUMNS: &str = "batch_id, date, system_id, mode, entity_ids, reference_lines, \
                             status, dispatched_count, result_count, created_at, updated_at";

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn create(&self, batch: &WorkBatch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_batches
                (batch_id, date, system_id, mode, entity_ids, reference_lines,
                 status, dispatched_count, result_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(batch.batch_id)
        .bind(batch.date)
        .bind(&batch.system_id)
        .bind(batch.mode.to_string())
        .bind(serde_json::to_value(&batch.entity_ids).unwrap_or_default())
        .bind(serde_json::to_value(&batch.reference_lines).unwrap_or_default())
        .bind(batch.status.to_string())
        .bind(batch.dispatched_count as i32)
        .bind(batch.result_count as i32)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, batch_id: Uuid) -> Result<Option<WorkBatch>> {
        let row: Option<BatchRow> = sqlx::query_as(&format!(
            "SELECT {BATCH_COLUMNS} FROM work_batches WHERE batch_id = $1"
        ))
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BatchRow::into_model).transpose()
    }

    async fn update_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE work_batches SET status = $2, updated_at = NOW() WHERE batch_id = $1",
        )
        .bind(batch_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PropcastError::store(
                "update_status",
                format!("no batch {batch_id}"),
            ));
        }
        Ok(())
    }

    async fn record_dispatch_progress(
        &self,
        batch_id: Uuid,
        dispatched_count: usize,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE work_batches SET dispatched_count = $2, updated_at = NOW() WHERE batch_id = $1",
        )
        .bind(batch_id)
        .bind(dispatched_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_result_count(&self, batch_id: Uuid, result_count: usize) -> Result<()> {
        sqlx::query(
            "UPDATE work_batches SET result_count = $2, updated_at = NOW() WHERE batch_id = $1",
        )
        .bind(batch_id)
        .bind(result_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn in_flight(&self) -> Result<Vec<WorkBatch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            "SELECT {BATCH_COLUMNS} FROM work_batches \
             WHERE status IN ('pending', 'dispatching', 'awaiting_results')"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BatchRow::into_model).collect()
    }
}

/// Postgres-backed staging store.
///
/// The dedup key is a unique index on `(entity_id, date, system_id)`; the
/// upsert only replaces when the incoming row is at least as new.
#[derive(Debug, Clone)]
pub struct PgStagingStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct StagedRow {
    staged_id: Uuid,
    batch_id: Uuid,
    entity_id: String,
    date: NaiveDate,
    system_id: String,
    model_file: String,
    predicted_value: f64,
    reference_line: f64,
    recommendation: String,
    confidence: f64,
    attempt: i32,
    input_sources: serde_json::Value,
    skipped_features: serde_json::Value,
    sample_quality: Option<String>,
    quality_score: Option<f64>,
    created_at: DateTime<Utc>,
}

impl StagedRow {
    fn into_model(self) -> Result<StagedPrediction> {
        let recommendation: Recommendation =
            parse_enum(&self.recommendation, "staged_predictions.recommendation")?;
        let sample_quality = self
            .sample_quality
            .as_deref()
            .map(|raw| {
                serde_json::from_value(serde_json::Value::String(raw.to_string()))
                    .map_err(|e: serde_json::Error| {
                        PropcastError::store("staged_predictions.sample_quality", e.to_string())
                    })
            })
            .transpose()?;
        Ok(StagedPrediction {
            staged_id: self.staged_id,
            batch_id: self.batch_id,
            entity_id: self.entity_id,
            date: self.date,
            system_id: self.system_id,
            model_file: self.model_file,
            predicted_value: self.predicted_value,
            reference_line: self.reference_line,
            recommendation,
            confidence: self.confidence,
            attempt: self.attempt as u32,
            input_sources: serde_json::from_value(self.input_sources)
                .map_err(|e| PropcastError::store("staged_predictions", e.to_string()))?,
            skipped_features: serde_json::from_value(self.skipped_features)
                .map_err(|e| PropcastError::store("staged_predictions", e.to_string()))?,
            sample_quality,
            quality_score: self.quality_score,
            created_at: self.created_at,
        })
    }
}

impl PgStagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StagingStore for PgStagingStore {
    async fn put(&self, staged: StagedPrediction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staged_predictions
                (staged_id, batch_id, entity_id, date, system_id, model_file,
                 predicted_value, reference_line, recommendation, confidence,
                 attempt, input_sources, skipped_features, sample_quality,
                 quality_score, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (entity_id, date, system_id) DO UPDATE SET
                staged_id = EXCLUDED.staged_id,
                batch_id = EXCLUDED.batch_id,
                model_file = EXCLUDED.model_file,
                predicted_value = EXCLUDED.predicted_value,
                reference_line = EXCLUDED.reference_line,
                recommendation = EXCLUDED.recommendation,
                confidence = EXCLUDED.confidence,
                attempt = EXCLUDED.attempt,
                input_sources = EXCLUDED.input_sources,
                skipped_features = EXCLUDED.skipped_features,
                sample_quality = EXCLUDED.sample_quality,
                quality_score = EXCLUDED.quality_score,
                created_at = EXCLUDED.created_at
            WHERE staged_predictions.created_at <= EXCLUDED.created_at
            "#,
        )
        .bind(staged.staged_id)
        .bind(staged.batch_id)
        .bind(&staged.entity_id)
        .bind(staged.date)
        .bind(&staged.system_id)
        .bind(&staged.model_file)
        .bind(staged.predicted_value)
        .bind(staged.reference_line)
        .bind(staged.recommendation.to_string())
        .bind(staged.confidence)
        .bind(staged.attempt as i32)
        .bind(serde_json::to_value(&staged.input_sources).unwrap_or_default())
        .bind(serde_json::to_value(&staged.skipped_features).unwrap_or_default())
        .bind(staged.sample_quality.map(|q| q.to_string()))
        .bind(staged.quality_score)
        .bind(staged.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn staged_for(
        &self,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Vec<StagedPrediction>> {
        let rows: Vec<StagedRow> = sqlx::query_as(
            r#"
            SELECT staged_id, batch_id, entity_id, date, system_id, model_file,
                   predicted_value, reference_line, recommendation, confidence,
                   attempt, input_sources, skipped_features, sample_quality,
                   quality_score, created_at
            FROM staged_predictions
            WHERE date = $1 AND system_id = $2
            "#,
        )
        .bind(date)
        .bind(system_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StagedRow::into_model).collect()
    }
}

/// Postgres-backed canonical store
#[derive(Debug, Clone)]
pub struct PgCanonicalStore {
    pool: PgPool,
}

impl PgCanonicalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PredictionRow {
    record_id: Uuid,
    entity_id: String,
    date: NaiveDate,
    system_id: String,
    model_file: String,
    predicted_value: f64,
    reference_line: f64,
    recommendation: String,
    confidence: f64,
    is_active: bool,
    superseded_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl PredictionRow {
    fn into_model(self) -> Result<PredictionRecord> {
        Ok(PredictionRecord {
            record_id: self.record_id,
            entity_id: self.entity_id,
            date: self.date,
            system_id: self.system_id,
            model_file: self.model_file,
            predicted_value: self.predicted_value,
            reference_line: self.reference_line,
            recommendation: parse_enum(&self.recommendation, "predictions.recommendation")?,
            confidence: self.confidence,
            is_active: self.is_active,
            superseded_by: self.superseded_by,
            created_at: self.created_at,
        })
    }
}

const PREDICTION_COLUMNS: &str = "record_id, entity_id, date, system_id, model_file, \
                                  predicted_value, reference_line, recommendation, confidence, \
                                  is_active, superseded_by, created_at";

#[async_trait]
impl CanonicalStore for PgCanonicalStore {
    #[instrument(skip(self, records), fields(record_count = records.len()))]
    async fn merge_active(&self, records: Vec<PredictionRecord>) -> Result<MergeOutcome> {
        let mut outcome = MergeOutcome {
            activated: 0,
            superseded: 0,
            unchanged: 0,
        };

        for incoming in records {
            let mut tx = self.pool.begin().await?;

            // A record id merges at most once
            let already_known: Option<(Uuid,)> =
                sqlx::query_as("SELECT record_id FROM predictions WHERE record_id = $1 FOR UPDATE")
                    .bind(incoming.record_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if already_known.is_some() {
                outcome.unchanged += 1;
                tx.commit().await?;
                continue;
            }

            let superseded = sqlx::query(
                r#"
                UPDATE predictions
                SET is_active = FALSE, superseded_by = $4
                WHERE entity_id = $1 AND date = $2 AND system_id = $3 AND is_active
                "#,
            )
            .bind(&incoming.entity_id)
            .bind(incoming.date)
            .bind(&incoming.system_id)
            .bind(incoming.record_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            sqlx::query(
                r#"
                INSERT INTO predictions
                    (record_id, entity_id, date, system_id, model_file, predicted_value,
                     reference_line, recommendation, confidence, is_active, superseded_by,
                     created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, NULL, $10)
                "#,
            )
            .bind(incoming.record_id)
            .bind(&incoming.entity_id)
            .bind(incoming.date)
            .bind(&incoming.system_id)
            .bind(&incoming.model_file)
            .bind(incoming.predicted_value)
            .bind(incoming.reference_line)
            .bind(incoming.recommendation.to_string())
            .bind(incoming.confidence)
            .bind(incoming.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            outcome.activated += 1;
            outcome.superseded += superseded as usize;
        }

        debug!(
            activated = outcome.activated,
            superseded = outcome.superseded,
            unchanged = outcome.unchanged,
            "Canonical merge complete"
        );
        Ok(outcome)
    }

    async fn active(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Option<PredictionRecord>> {
        let row: Option<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions \
             WHERE entity_id = $1 AND date = $2 AND system_id = $3 AND is_active"
        ))
        .bind(entity_id)
        .bind(date)
        .bind(system_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PredictionRow::into_model).transpose()
    }

    async fn all_for(
        &self,
        entity_id: &str,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<Vec<PredictionRecord>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions \
             WHERE entity_id = $1 AND date = $2 AND system_id = $3 \
             ORDER BY created_at"
        ))
        .bind(entity_id)
        .bind(date)
        .bind(system_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PredictionRow::into_model).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Postgres-backed execution log sink
#[derive(Debug, Clone)]
pub struct PgLogSink {
    pool: PgPool,
}

impl PgLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogSink for PgLogSink {
    async fn write(&self, log: ExecutionLog) -> Result<()> {
        validate_log_row(&log)?;
        sqlx::query(
            r#"
            INSERT INTO execution_logs
                (log_id, entity_id, batch_id, date, system_id, attempt, outcome,
                 skip_reason, duration_ms, input_sources, contaminated_indices,
                 warnings, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(log.log_id)
        .bind(&log.entity_id)
        .bind(log.batch_id)
        .bind(log.date)
        .bind(&log.system_id)
        .bind(log.attempt as i32)
        .bind(log.outcome.to_string())
        .bind(&log.skip_reason)
        .bind(log.duration_ms as i64)
        .bind(serde_json::to_value(&log.input_sources).unwrap_or_default())
        .bind(serde_json::to_value(&log.contaminated_indices).unwrap_or_default())
        .bind(serde_json::to_value(&log.warnings).unwrap_or_default())
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

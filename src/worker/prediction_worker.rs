//! Work-item processing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{PropcastConfig, WorkerConfig};
use crate::constants::events;
use crate::error::PropcastError;
use crate::events::EventPublisher;
use crate::messaging::WorkItem;
use crate::models::{
    ExecutionLog, ExecutionOutcome, Recommendation, StagedPrediction,
};
use crate::quality::{QualityGate, UnusableReason};
use crate::resilience::EntityBreakerRegistry;
use crate::scoring::Scorer;
use crate::store::{BatchStore, ExecutionLogSink, FeatureStore, StagingStore};

/// Terminal classification of one work-item delivery.
///
/// Maps directly onto the push endpoint's status codes: `Ack` and
/// `PermanentSkip` acknowledge (200 / 422, no redelivery), `Retryable`
/// negative-acknowledges (503, provider redelivery with backoff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum WorkOutcome {
    /// Processed (or deliberately dropped); nothing more to do
    Ack { staged: bool },
    /// Deterministic skip; redelivery cannot change the answer
    PermanentSkip { reason: String },
    /// Transient failure; worth redelivering with backoff
    Retryable { reason: String },
}

impl WorkOutcome {
    fn permanent(reason: impl std::fmt::Display) -> Self {
        Self::PermanentSkip {
            reason: reason.to_string(),
        }
    }

    fn retryable(reason: impl std::fmt::Display) -> Self {
        Self::Retryable {
            reason: reason.to_string(),
        }
    }
}

/// Stateless work-item processor.
pub struct PredictionWorker {
    features: Arc<dyn FeatureStore>,
    batches: Arc<dyn BatchStore>,
    staging: Arc<dyn StagingStore>,
    log_sink: Arc<dyn ExecutionLogSink>,
    breakers: Arc<EntityBreakerRegistry>,
    scorer: Arc<dyn Scorer>,
    gate: QualityGate,
    events: EventPublisher,
    config: Arc<PropcastConfig>,
}

impl PredictionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        features: Arc<dyn FeatureStore>,
        batches: Arc<dyn BatchStore>,
        staging: Arc<dyn StagingStore>,
        log_sink: Arc<dyn ExecutionLogSink>,
        breakers: Arc<EntityBreakerRegistry>,
        scorer: Arc<dyn Scorer>,
        events: EventPublisher,
        config: Arc<PropcastConfig>,
    ) -> Self {
        let gate = QualityGate::new(config.quality.sentinels.clone());
        Self {
            features,
            batches,
            staging,
            log_sink,
            breakers,
            scorer,
            gate,
            events,
            config,
        }
    }

    /// Process one delivered work item.
    ///
    /// Never returns an error to the push endpoint; every failure collapses
    /// into a `WorkOutcome` so the HTTP layer only maps, never decides.
    #[instrument(skip(self), fields(entity_id = %item.entity_id, batch_id = %item.batch_id, attempt = item.attempt))]
    pub async fn process(&self, item: &WorkItem) -> WorkOutcome {
        let started = Instant::now();

        // Staleness first: long backlogs deliver work for dates that are no
        // longer actionable. Ack and drop before touching anything.
        if self.is_stale(item) {
            debug!(date = %item.date, "Stale work item dropped");
            self.events.publish(
                events::STALE_ITEM_DROPPED,
                json!({ "entity_id": item.entity_id, "date": item.date }),
            );
            self.write_log(item, ExecutionOutcome::StaleDropped, None, started, |log| log)
                .await;
            return WorkOutcome::Ack { staged: false };
        }

        match self.process_fresh(item, started).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                // Breaker open: redelivery cannot help until the cooldown
                // lapses, so the item is acknowledged instead of bounced
                // back into the queue
                if self.breakers.is_tripped(&item.entity_id) {
                    warn!(
                        entity_id = %item.entity_id,
                        error = %e,
                        "Breaker open, dropping work item"
                    );
                    self.write_log(item, ExecutionOutcome::Retryable, None, started, |log| {
                        log.with_warning(format!("breaker open, dropped: {e}"))
                    })
                    .await;
                    return WorkOutcome::Ack { staged: false };
                }
                if self.breakers.record_failure(&item.entity_id) {
                    self.events.publish(
                        events::BREAKER_TRIPPED,
                        json!({ "entity_id": item.entity_id, "system_id": item.system_id }),
                    );
                    warn!(entity_id = %item.entity_id, "Entity circuit breaker tripped");
                }
                self.write_log(item, ExecutionOutcome::Retryable, None, started, |log| {
                    log.with_warning(e.to_string())
                })
                .await;
                WorkOutcome::retryable(e)
            }
            Err(e) => {
                // Deterministic failures are expected steady-state; logged,
                // never counted against the breaker
                self.write_log(
                    item,
                    ExecutionOutcome::PermanentSkip,
                    Some(e.to_string()),
                    started,
                    |log| log,
                )
                .await;
                self.publish_skip(item, &e.to_string());
                WorkOutcome::permanent(e)
            }
        }
    }

    async fn process_fresh(
        &self,
        item: &WorkItem,
        started: Instant,
    ) -> crate::error::Result<WorkOutcome> {
        let policy = self.config.system_quality(&item.system_id)?;

        let batch = self
            .batches
            .get(item.batch_id)
            .await?
            .ok_or_else(|| {
                PropcastError::validation(format!("unknown batch {}", item.batch_id))
            })?;

        // The line map was fixed at batch build; redelivery cannot grow it,
        // so a missing line is permanent
        let Some(reference_line) = batch.reference_line(&item.entity_id) else {
            return Err(PropcastError::validation(format!(
                "no reference line for entity {}",
                item.entity_id
            )));
        };

        let features = self
            .features
            .get_features(&item.entity_id, item.date)
            .await?
            .ok_or_else(|| {
                // Feature cache not yet materialized; worth a redelivery
                PropcastError::upstream_unavailable(format!(
                    "no features for entity {} on {}",
                    item.entity_id, item.date
                ))
            })?;

        let verdict = self.gate.evaluate(&features, policy);

        if verdict.is_contaminated() {
            // Distinct alert: this is an upstream bug injecting fake data,
            // not ordinary missingness
            self.events.publish(
                events::CONTAMINATION_DETECTED,
                json!({
                    "entity_id": item.entity_id,
                    "date": item.date,
                    "system_id": item.system_id,
                    "indices": verdict.contaminated_indices,
                }),
            );
            warn!(
                entity_id = %item.entity_id,
                indices = ?verdict.contaminated_indices,
                "Contaminated features detected"
            );
        }

        if !verdict.usable {
            let reason = verdict
                .primary_reason()
                .unwrap_or(UnusableReason::SchemaViolation);
            self.write_log(
                item,
                ExecutionOutcome::PermanentSkip,
                Some(reason.to_string()),
                started,
                |log| {
                    log.with_input_sources(features.sources.clone())
                        .with_contaminated_indices(verdict.contaminated_indices.clone())
                },
            )
            .await;
            self.publish_skip(item, &reason.to_string());
            return Ok(WorkOutcome::permanent(reason));
        }

        let predicted_value = self
            .scorer
            .score(&features)
            .map_err(PropcastError::Scoring)?;
        let recommendation =
            Recommendation::from_edge(predicted_value, reference_line, policy.min_edge);
        let confidence = Self::calibrate_confidence(
            features.quality_score,
            features.sample_quality.confidence_factor(),
        );

        let staged = StagedPrediction {
            staged_id: Uuid::new_v4(),
            batch_id: item.batch_id,
            entity_id: item.entity_id.clone(),
            date: item.date,
            system_id: item.system_id.clone(),
            model_file: self.scorer.model_file().to_string(),
            predicted_value,
            reference_line,
            recommendation,
            confidence,
            attempt: item.attempt,
            input_sources: features.sources.clone(),
            skipped_features: Vec::new(),
            sample_quality: Some(features.sample_quality),
            quality_score: Some(features.quality_score),
            created_at: Utc::now(),
        };
        self.staging.put(staged).await?;

        self.breakers.record_success(&item.entity_id);
        self.events.publish(
            events::PREDICTION_STAGED,
            json!({
                "entity_id": item.entity_id,
                "date": item.date,
                "system_id": item.system_id,
                "predicted_value": predicted_value,
                "recommendation": recommendation,
            }),
        );
        info!(
            entity_id = %item.entity_id,
            predicted_value,
            reference_line,
            recommendation = %recommendation,
            "Prediction staged"
        );

        self.write_log(item, ExecutionOutcome::Staged, None, started, |log| {
            log.with_input_sources(features.sources.clone())
        })
        .await;

        Ok(WorkOutcome::Ack { staged: true })
    }

    fn is_stale(&self, item: &WorkItem) -> bool {
        let WorkerConfig { stale_after_days } = self.config.worker;
        let today = Utc::now().date_naive();
        today.signed_duration_since(item.date).num_days() > stale_after_days
    }

    /// Confidence from the upstream quality score scaled by the
    /// sample-quality tier factor, clamped to [0, 1].
    fn calibrate_confidence(quality_score: f64, tier_factor: f64) -> f64 {
        ((quality_score / 100.0) * tier_factor).clamp(0.0, 1.0)
    }

    fn publish_skip(&self, item: &WorkItem, reason: &str) {
        self.events.publish(
            events::PREDICTION_SKIPPED,
            json!({
                "entity_id": item.entity_id,
                "date": item.date,
                "system_id": item.system_id,
                "reason": reason,
            }),
        );
    }

    async fn write_log(
        &self,
        item: &WorkItem,
        outcome: ExecutionOutcome,
        skip_reason: Option<String>,
        started: Instant,
        decorate: impl FnOnce(ExecutionLog) -> ExecutionLog,
    ) {
        let mut log = ExecutionLog::new(
            item.entity_id.clone(),
            item.batch_id,
            item.date,
            item.system_id.clone(),
            item.attempt,
            outcome,
            started.elapsed().as_millis() as u64,
        );
        if let Some(reason) = skip_reason {
            log = log.with_skip_reason(reason);
        }
        log = decorate(log);

        // A failed log write never changes the delivery outcome
        if let Err(e) = self.log_sink.write(log).await {
            warn!(entity_id = %item.entity_id, error = %e, "Execution log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_calibration() {
        assert!((PredictionWorker::calibrate_confidence(100.0, 1.0) - 1.0).abs() < 1e-12);
        assert!((PredictionWorker::calibrate_confidence(80.0, 0.9) - 0.72).abs() < 1e-12);
        assert!((PredictionWorker::calibrate_confidence(50.0, 0.5) - 0.25).abs() < 1e-12);
        assert_eq!(PredictionWorker::calibrate_confidence(150.0, 1.0), 1.0);
    }
}

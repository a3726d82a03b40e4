//! Batch build, dispatch, and lifecycle control.
//!
//! Dispatch is sequential with a fixed inter-publish delay. The queue and
//! the worker autoscaler behave better under a steady arrival rate than a
//! burst; this is backpressure, not an optimization. A partial publish
//! failure marks the batch `Failed` carrying the count actually enqueued;
//! the retry path republishes only the un-enqueued tail, never the whole
//! batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::consolidator::{ConsolidationResult, StagingConsolidator};
use crate::config::DispatchConfig;
use crate::constants::{events, system::MAX_BATCH_ENTITIES};
use crate::error::{PropcastError, Result};
use crate::events::EventPublisher;
use crate::messaging::{QueuePublisher, WorkItem};
use crate::models::{BatchStatus, RunMode, WorkBatch};
use crate::resilience::EntityBreakerRegistry;
use crate::store::{BatchStore, EntityUniverse, LineSource};

/// Summary of one dispatch pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub batch_id: Uuid,
    /// Work items published by this pass
    pub published: usize,
    /// Total published across all passes for this batch
    pub total_dispatched: usize,
    /// Whether the batch is now fully dispatched
    pub complete: bool,
}

/// Coordinates prediction batches for `(date, system)` pairs.
///
/// Holds no batch state in memory: everything that must survive a restart
/// lives in the batch store.
pub struct BatchCoordinator {
    batch_store: Arc<dyn BatchStore>,
    universe: Arc<dyn EntityUniverse>,
    lines: Arc<dyn LineSource>,
    queue: Arc<dyn QueuePublisher>,
    breakers: Arc<EntityBreakerRegistry>,
    consolidator: StagingConsolidator,
    events: EventPublisher,
    config: DispatchConfig,
}

impl BatchCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch_store: Arc<dyn BatchStore>,
        universe: Arc<dyn EntityUniverse>,
        lines: Arc<dyn LineSource>,
        queue: Arc<dyn QueuePublisher>,
        breakers: Arc<EntityBreakerRegistry>,
        consolidator: StagingConsolidator,
        events: EventPublisher,
        config: DispatchConfig,
    ) -> Self {
        Self {
            batch_store,
            universe,
            lines,
            queue,
            breakers,
            consolidator,
            events,
            config,
        }
    }

    /// Build a batch for a `(date, system)` pair: entity universe, latest
    /// reference line per entity, circuit-broken entities excluded.
    #[instrument(skip(self), fields(date = %date, system_id = %system_id, mode = %mode))]
    pub async fn start_batch(
        &self,
        date: NaiveDate,
        system_id: &str,
        mode: RunMode,
    ) -> Result<WorkBatch> {
        let universe = self.universe.entities_for(date).await?;
        if universe.is_empty() {
            return Err(PropcastError::validation(format!(
                "no entities scheduled for {date}"
            )));
        }

        let mut entity_ids = Vec::new();
        let mut reference_lines = HashMap::new();
        let mut skipped_tripped = 0usize;
        let mut skipped_no_line = 0usize;

        for entity_id in universe.into_iter().take(MAX_BATCH_ENTITIES) {
            if self.breakers.is_tripped(&entity_id) {
                skipped_tripped += 1;
                continue;
            }
            match self.lines.latest_line(&entity_id, date, system_id).await? {
                Some(line) => {
                    reference_lines.insert(entity_id.clone(), line);
                    entity_ids.push(entity_id);
                }
                None => skipped_no_line += 1,
            }
        }

        if skipped_tripped > 0 || skipped_no_line > 0 {
            warn!(
                skipped_tripped,
                skipped_no_line,
                included = entity_ids.len(),
                "Entities excluded at batch build"
            );
        }

        let batch = WorkBatch::new(date, system_id, mode, entity_ids, reference_lines);
        self.batch_store.create(&batch).await?;

        self.events.publish(
            events::BATCH_CREATED,
            json!({
                "batch_id": batch.batch_id,
                "date": date,
                "system_id": system_id,
                "entity_count": batch.entity_ids.len(),
                "skipped_tripped": skipped_tripped,
                "skipped_no_line": skipped_no_line,
            }),
        );
        info!(
            batch_id = %batch.batch_id,
            entity_count = batch.entity_ids.len(),
            "Work batch created"
        );
        Ok(batch)
    }

    /// Publish one work item per entity, sequentially, with the configured
    /// inter-publish delay.
    pub async fn dispatch(&self, batch_id: Uuid) -> Result<DispatchResult> {
        let batch = self.require_batch(batch_id, "dispatch").await?;
        match batch.status {
            BatchStatus::Pending => {}
            // The remainder path for a partially dispatched batch
            BatchStatus::Failed if batch.dispatched_count < batch.entity_ids.len() => {}
            other => {
                return Err(PropcastError::validation(format!(
                    "batch {batch_id} is {other}, not dispatchable"
                )));
            }
        }
        self.publish_from(batch).await
    }

    /// Retry only the un-enqueued tail of a partially failed batch.
    /// Already-dispatched entities are never republished; workers are
    /// idempotent regardless, but duplicate work is still wasted work.
    pub async fn dispatch_remainder(&self, batch_id: Uuid) -> Result<DispatchResult> {
        let batch = self.require_batch(batch_id, "dispatch_remainder").await?;
        if batch.status != BatchStatus::Failed {
            return Err(PropcastError::validation(format!(
                "batch {batch_id} is {}, remainder retry needs a failed batch",
                batch.status
            )));
        }
        self.publish_from(batch).await
    }

    async fn publish_from(&self, batch: WorkBatch) -> Result<DispatchResult> {
        let batch_id = batch.batch_id;
        let start_offset = batch.dispatched_count;
        let total = batch.entity_ids.len();
        let delay = Duration::from_millis(self.config.inter_publish_delay_ms);

        self.batch_store
            .update_status(batch_id, BatchStatus::Dispatching)
            .await?;

        let mut dispatched = start_offset;
        for entity_id in batch.undispatched() {
            let item = WorkItem::new(entity_id.clone(), batch_id, batch.date, &batch.system_id);
            let payload = serde_json::to_value(&item)
                .map_err(crate::messaging::MessagingError::from)?;

            match self.queue.publish(&self.config.work_queue, &payload).await {
                Ok(msg_id) => {
                    dispatched += 1;
                    self.batch_store
                        .record_dispatch_progress(batch_id, dispatched)
                        .await?;
                    debug!(entity_id = %entity_id, msg_id, dispatched, "Work item published");
                }
                Err(e) => {
                    // Stop here: the batch keeps the exact count enqueued so
                    // the remainder retry resumes at the right offset
                    self.batch_store
                        .update_status(batch_id, BatchStatus::Failed)
                        .await?;
                    self.events.publish(
                        events::BATCH_DISPATCH_FAILED,
                        json!({
                            "batch_id": batch_id,
                            "dispatched": dispatched,
                            "total": total,
                            "error": e.to_string(),
                        }),
                    );
                    warn!(
                        batch_id = %batch_id,
                        dispatched,
                        total,
                        error = %e,
                        "Dispatch failed partway; batch marked failed"
                    );
                    return Ok(DispatchResult {
                        batch_id,
                        published: dispatched - start_offset,
                        total_dispatched: dispatched,
                        complete: false,
                    });
                }
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        self.batch_store
            .update_status(batch_id, BatchStatus::AwaitingResults)
            .await?;
        self.events.publish(
            events::BATCH_DISPATCHED,
            json!({ "batch_id": batch_id, "dispatched": dispatched }),
        );
        info!(batch_id = %batch_id, dispatched, "Batch fully dispatched");

        Ok(DispatchResult {
            batch_id,
            published: dispatched - start_offset,
            total_dispatched: dispatched,
            complete: true,
        })
    }

    /// Consolidate staged results for a batch into the canonical store.
    #[instrument(skip(self))]
    pub async fn consolidate(&self, batch_id: Uuid) -> Result<ConsolidationResult> {
        let batch = self.require_batch(batch_id, "consolidate").await?;
        if !crate::constants::status_groups::CONSOLIDATABLE_BATCH_STATES
            .contains(&batch.status)
        {
            return Err(PropcastError::validation(format!(
                "batch {batch_id} is {}, not consolidatable",
                batch.status
            )));
        }

        let result = self
            .consolidator
            .consolidate(batch.date, &batch.system_id)
            .await?;

        self.batch_store
            .record_result_count(batch_id, result.distinct_entities)
            .await?;
        self.batch_store
            .update_status(batch_id, BatchStatus::Consolidated)
            .await?;
        self.events.publish(
            events::BATCH_CONSOLIDATED,
            json!({
                "batch_id": batch_id,
                "staged_rows": result.staged_rows,
                "activated": result.merge.activated,
                "superseded": result.merge.superseded,
            }),
        );
        Ok(result)
    }

    /// Operator abort: mark every in-flight batch failed. Staged results
    /// stay where they are (the next consolidate run picks them up) and
    /// published work items are not recalled; workers re-validate staleness
    /// at consumption time, which is the real cancellation mechanism.
    pub async fn reset(&self) -> Result<Vec<Uuid>> {
        let in_flight = self.batch_store.in_flight().await?;
        let mut reset_ids = Vec::with_capacity(in_flight.len());
        for batch in in_flight {
            self.batch_store
                .update_status(batch.batch_id, BatchStatus::Failed)
                .await?;
            reset_ids.push(batch.batch_id);
        }
        if !reset_ids.is_empty() {
            self.events.publish(
                events::BATCH_RESET,
                json!({ "batch_ids": reset_ids }),
            );
            info!(count = reset_ids.len(), "In-flight batches reset");
        }
        Ok(reset_ids)
    }

    pub async fn batch(&self, batch_id: Uuid) -> Result<Option<WorkBatch>> {
        self.batch_store.get(batch_id).await
    }

    async fn require_batch(&self, batch_id: Uuid, operation: &str) -> Result<WorkBatch> {
        self.batch_store
            .get(batch_id)
            .await?
            .ok_or_else(|| PropcastError::store(operation, format!("no batch {batch_id}")))
    }
}
